// Integration tests for the hopper logging macros

use std::io;
use std::sync::{Arc, Mutex};

struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_macros_emit_through_crate_paths() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || Capture(writer.clone()))
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let span = hopper::actor_span!("actor-7");
        let _guard = span.enter();
        hopper::log_transition!("actor-7", "enqueue", "idle", "scheduled");
        hopper::log_scheduler!("global_pool", "job_queued", bucket = 2);
        hopper::log_error!("boom");
    });

    let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(output.contains("actor-7"));
    assert!(output.contains("old=idle"));
    assert!(output.contains("new=scheduled"));
    assert!(output.contains("job_queued"));
    assert!(output.contains("bucket=2"));
    assert!(output.contains("error=boom"));
}
