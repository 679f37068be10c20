use tracing::debug;

/// A thread paired with the control half of its run-flag.
pub struct ControlledJoinHandle<T> {
    control: thread_control::Control,
    join_handle: std::thread::JoinHandle<T>,
}

impl<T: Send + 'static> ControlledJoinHandle<T> {
    /// Spawn a named thread running `f` with the flag half of a new run-flag.
    pub fn spawn<F>(name: &str, f: F) -> std::io::Result<Self>
    where
        F: FnOnce(thread_control::Flag) -> T + Send + 'static,
    {
        let (flag, control) = thread_control::make_pair();
        let join_handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || f(flag))?;
        Ok(Self {
            control,
            join_handle,
        })
    }
}

impl<T> ControlledJoinHandle<T> {
    /// Ask the thread to stop without waiting.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// True once the thread has dropped its flag.
    pub fn is_done(&self) -> bool {
        self.control.is_done()
    }

    pub fn name(&self) -> Option<&str> {
        self.join_handle.thread().name()
    }

    pub fn close_and_join(self) -> std::thread::Result<T> {
        debug!("sending stop to thread {:?}", self.name());
        self.control.stop();
        debug!("joining thread {:?}", self.name());
        self.join_handle.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_and_join_returns_thread_result() {
        let cjh = ControlledJoinHandle::spawn("counter", |flag| {
            while flag.is_alive() {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            42
        })
        .unwrap();
        assert_eq!(cjh.name(), Some("counter"));
        assert!(!cjh.is_done());
        assert_eq!(cjh.close_and_join().unwrap(), 42);
    }

    #[test]
    fn panicking_thread_reports_error() {
        let cjh = ControlledJoinHandle::spawn("panics", |_flag| -> () { panic!("boom") }).unwrap();
        assert!(cjh.close_and_join().is_err());
    }
}
