mod unix_process_manager;

#[cfg(unix)]
pub use unix_process_manager::{UnixProcessHandle, UnixProcessManager};

use botvisor_core::{ProcessManager, ProcessManagerFactory};

pub struct UnixProcessManagerFactory;

#[cfg(unix)]
impl ProcessManagerFactory for UnixProcessManagerFactory {
    type Manager = UnixProcessManager;

    fn create_process_manager() -> UnixProcessManager {
        <UnixProcessManager as ProcessManager>::new()
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
