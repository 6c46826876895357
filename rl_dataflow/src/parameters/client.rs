//! Agent-side parameter pulls.

use crate::config::ParameterClientConfig;
use crate::error::{DataflowError, Result};
use crate::parameters::module_dict::ParameterState;
use crate::parameters::protocol::{ParameterRequest, ParameterResponse};
use crate::parameters::snapshot::ParameterMetadata;
use crate::transport::reqrep::{Endpoint, ReqRepClient, Requester};

/// Pulls parameters from a relay and applies them to local state.
///
/// The client remembers the hash of the last blob it applied and sends it
/// with every pull, so an unchanged snapshot costs one round trip and no
/// payload. On any error `last_hash` and the local state are left as they
/// were.
pub struct ParameterClient<S, R> {
    state: S,
    requester: R,
    last_hash: String,
}

impl<S: ParameterState> ParameterClient<S, ReqRepClient> {
    /// Connect to a relay endpoint using `config`.
    pub fn connect(state: S, endpoint: &Endpoint, config: &ParameterClientConfig) -> Self {
        Self::new(state, endpoint.connect().with_timeout(config.timeout))
    }
}

impl<S: ParameterState, R: Requester> ParameterClient<S, R> {
    pub fn new(state: S, requester: R) -> Self {
        Self {
            state,
            requester,
            last_hash: String::new(),
        }
    }

    /// Hash of the last applied blob; empty before the first fetch.
    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Pull the latest parameters if they changed. Returns whether a blob
    /// was applied.
    pub fn fetch_parameter(&mut self) -> Result<bool> {
        match self.call(ParameterRequest::parameter(self.last_hash.clone()))? {
            ParameterResponse::Parameter { blob, current_hash } => {
                let fetched = self.apply(blob)?;
                self.last_hash = current_hash;
                Ok(fetched)
            }
            other => Err(unexpected("parameter", &other)),
        }
    }

    /// Like [`fetch_parameter`](Self::fetch_parameter), also returning the
    /// relay's metadata. With no snapshot on the relay `last_hash` is reset.
    pub fn fetch_parameter_with_info(&mut self) -> Result<(bool, Option<ParameterMetadata>)> {
        match self.call(ParameterRequest::both(self.last_hash.clone()))? {
            ParameterResponse::Both { blob, metadata } => {
                if blob.is_some() && metadata.is_none() {
                    return Err(DataflowError::Protocol(
                        "blob received without metadata".into(),
                    ));
                }
                let fetched = self.apply(blob)?;
                self.last_hash = metadata
                    .as_ref()
                    .map(|m| m.hash.clone())
                    .unwrap_or_default();
                Ok((fetched, metadata))
            }
            other => Err(unexpected("both", &other)),
        }
    }

    /// Metadata of the relay's current snapshot. Changes nothing locally.
    pub fn fetch_info(&self) -> Result<Option<ParameterMetadata>> {
        match self.call(ParameterRequest::Info)? {
            ParameterResponse::Info(metadata) => Ok(metadata),
            other => Err(unexpected("info", &other)),
        }
    }

    fn call(&self, request: ParameterRequest) -> Result<ParameterResponse> {
        let reply = self.requester.request(request.encode()?)?;
        ParameterResponse::decode(&reply)
            .map_err(|e| DataflowError::Protocol(format!("undecodable reply: {e}")))
    }

    fn apply(&self, blob: Option<Vec<u8>>) -> Result<bool> {
        match blob {
            Some(blob) => {
                self.state.loads(&blob)?;
                log::debug!("Applied parameter blob ({} bytes)", blob.len());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn unexpected(request: &str, reply: &ParameterResponse) -> DataflowError {
    DataflowError::Protocol(format!("unexpected reply to '{request}': {reply:?}"))
}
