//! Learner-side parameter broadcasting.

use crate::codec;
use crate::error::Result;
use crate::parameters::module_dict::ParameterState;
use crate::parameters::snapshot::{ParameterMetadata, ParameterSnapshot};
use crate::transport::pubsub::Publish;

/// Default topic for parameter broadcasts.
pub const DEFAULT_TOPIC: &str = "ps";

/// Broadcasts the learner's parameters to every relay listening.
///
/// Delivery is best-effort. A relay that is not subscribed when `publish`
/// runs misses that version and picks up the next one.
pub struct ParameterPublisher<S, P> {
    state: S,
    publisher: P,
    topic: String,
}

impl<S: ParameterState, P: Publish> ParameterPublisher<S, P> {
    pub fn new(state: S, publisher: P) -> Self {
        Self {
            state,
            publisher,
            topic: DEFAULT_TOPIC.to_string(),
        }
    }

    /// Publish on `topic` instead of the default.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Dump, hash and broadcast the current parameters.
    ///
    /// If the state cannot be serialized nothing is sent.
    pub fn publish(&self, iteration: u64, message: impl Into<String>) -> Result<()> {
        let blob = self.state.dumps()?;
        let hash = codec::content_hash(&blob);
        let metadata = ParameterMetadata::now(iteration, message, hash);
        log::debug!(
            "Publishing parameters: iteration={} bytes={} hash={}",
            iteration,
            blob.len(),
            metadata.hash
        );
        let payload = codec::serialize(&ParameterSnapshot::new(blob, metadata))?;
        self.publisher.publish(&self.topic, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataflowError;
    use parking_lot::Mutex;

    struct Blob(Vec<u8>);

    impl ParameterState for Blob {
        fn dumps(&self) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }

        fn loads(&self, _blob: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl ParameterState for Broken {
        fn dumps(&self) -> Result<Vec<u8>> {
            Err(DataflowError::Serialization("tensor on wrong device".into()))
        }

        fn loads(&self, _blob: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Capture(Mutex<Vec<(String, Vec<u8>)>>);

    impl Publish for Capture {
        fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            self.0.lock().push((topic.to_string(), payload));
            Ok(())
        }
    }

    #[test]
    fn test_publish_sends_blob_and_metadata() {
        let publisher = ParameterPublisher::new(Blob(b"v1".to_vec()), Capture::default());
        publisher.publish(7, "warmup done").unwrap();

        let sent = publisher.publisher.0.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ps");
        let snapshot: ParameterSnapshot = codec::deserialize(&sent[0].1).unwrap();
        assert_eq!(snapshot.blob, b"v1");
        assert_eq!(snapshot.metadata.iteration, 7);
        assert_eq!(snapshot.metadata.message, "warmup done");
        assert_eq!(snapshot.metadata.hash, codec::content_hash(b"v1"));
    }

    #[test]
    fn test_custom_topic() {
        let publisher = ParameterPublisher::new(Blob(vec![1]), Capture::default()).with_topic("ps-eval");
        publisher.publish(1, "").unwrap();
        assert_eq!(publisher.topic(), "ps-eval");
        assert_eq!(publisher.publisher.0.lock()[0].0, "ps-eval");
    }

    #[test]
    fn test_serialization_failure_publishes_nothing() {
        let publisher = ParameterPublisher::new(Broken, Capture::default());
        let err = publisher.publish(1, "").unwrap_err();
        assert!(matches!(err, DataflowError::Serialization(_)));
        assert!(publisher.publisher.0.lock().is_empty());
    }
}
