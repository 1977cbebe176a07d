//! Process-wide bookkeeping attached to every generation request.

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::io::service::RequestMeta;

/// Lives for the whole invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunState {
    render_id: String,
    /// Number of generation requests issued so far.
    call_counter: u64,
    unittest_batch_id: u32,
}

impl RunState {
    /// Fresh render id, or the replayed one when given.
    pub fn new(replay_with: Option<String>) -> Self {
        let render_id = match replay_with {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        debug!(%render_id, "run state created");
        Self {
            render_id,
            call_counter: 0,
            unittest_batch_id: 0,
        }
    }

    pub fn render_id(&self) -> &str {
        &self.render_id
    }

    pub fn unittest_batch_id(&self) -> u32 {
        self.unittest_batch_id
    }

    /// Metadata for the next outbound request; the call index is 1-based.
    pub fn next_request_meta(&mut self) -> RequestMeta {
        self.call_counter += 1;
        RequestMeta {
            render_id: self.render_id.clone(),
            call_index: self.call_counter,
            unittest_batch_id: self.unittest_batch_id,
        }
    }

    pub fn start_unittest_batch(&mut self) {
        self.unittest_batch_id += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_reuses_render_id() {
        let state = RunState::new(Some("render-42".to_string()));
        assert_eq!(state.render_id(), "render-42");
    }

    #[test]
    fn fresh_render_id_is_a_uuid() {
        let state = RunState::new(None);
        assert!(Uuid::parse_str(state.render_id()).is_ok());
        let blank = RunState::new(Some("  ".to_string()));
        assert!(Uuid::parse_str(blank.render_id()).is_ok());
    }

    #[test]
    fn request_meta_counts_calls_and_batches() {
        let mut state = RunState::new(Some("r".to_string()));
        let first = state.next_request_meta();
        state.start_unittest_batch();
        let second = state.next_request_meta();
        assert_eq!((first.call_index, first.unittest_batch_id), (1, 0));
        assert_eq!((second.call_index, second.unittest_batch_id), (2, 1));
        assert_eq!(second.render_id, "r");
    }
}
