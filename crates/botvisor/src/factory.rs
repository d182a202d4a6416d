use botvisor_core::ProcessManagerFactory;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

#[cfg(unix)]
impl ProcessManagerFactory for PlatformProcessManagerFactory {
    type Manager = botvisor_unix::UnixProcessManager;

    fn create_process_manager() -> Self::Manager {
        botvisor_unix::UnixProcessManagerFactory::create_process_manager()
    }

    fn platform_name() -> &'static str {
        botvisor_unix::UnixProcessManagerFactory::platform_name()
    }
}

#[cfg(not(unix))]
compile_error!("Unsupported platform: only Unix is currently supported");

/// Process manager used by the server binary on this platform
pub type PlatformProcessManager = <PlatformProcessManagerFactory as ProcessManagerFactory>::Manager;
