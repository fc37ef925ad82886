//! The paginated topology RPC collaborator: how the refresh engine asks the external
//! stream-metadata source "what shards exist right now?"
//!
//! Shaped after `gazette::journal::list`'s request/response/continuation-token pagination, with
//! the method expressed in return-position-`impl Trait` form (no `async-trait`), matching
//! `gazette::journal::list::Fold`'s own `impl Future<...> + Send` return style.

use crate::shard::Shard;
use std::future::Future;

/// One page of a paginated shard listing request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageRequest {
    /// The first page of a fresh listing: targets the stream by name (and optionally ARN),
    /// restricted to currently-open shards.
    First {
        stream_name: String,
        stream_arn: Option<String>,
        max_results: u32,
    },
    /// A subsequent page, identified purely by the continuation token from the prior response.
    Next {
        continuation_token: String,
        max_results: u32,
    },
}

impl PageRequest {
    pub fn max_results(&self) -> u32 {
        match self {
            PageRequest::First { max_results, .. } => *max_results,
            PageRequest::Next { max_results, .. } => *max_results,
        }
    }
}

/// One page of shard descriptors, plus an optional token for the next page. Absence of the token
/// signals the end of pagination.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Page {
    pub shards: Vec<Shard>,
    pub continuation_token: Option<String>,
}

impl Page {
    pub fn is_last(&self) -> bool {
        self.continuation_token.is_none()
    }
}

/// Generic wrapper for whatever error type a `TopologyClient` implementation surfaces. The
/// refresh engine treats every topology failure uniformly as transient, so it only needs the
/// `std::error::Error` bound, not the concrete type.
#[derive(Debug, thiserror::Error)]
#[error("topology request failed")]
pub struct TopologyError(#[source] Box<dyn std::error::Error + Send + Sync>);

impl TopologyError {
    pub fn new(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(source))
    }
}

/// A paginated async RPC client over the external shard topology source.
pub trait TopologyClient: Send + Sync + 'static {
    fn list_shards(
        &self,
        request: PageRequest,
    ) -> impl Future<Output = Result<Page, TopologyError>> + Send;
}


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;
    use crate::hash_key::HashKeyRange;
    use crate::shard::SequenceNumberRange;
    use crate::shard_id::ShardId;

    fn shard(id: u64) -> Shard {
        Shard {
            shard_id: ShardId(id),
            hash_key_range: HashKeyRange::new(0, 1),
            sequence_number_range: SequenceNumberRange {
                starting: 0,
                ending: None,
            },
            parent_shard_id: None,
            adjacent_parent_shard_id: None,
        }
    }

    #[tokio::test]
    async fn mock_client_replays_its_script_in_order() {
        let client = MockTopologyClient::new(vec![
            Scripted::Page(Page {
                shards: vec![shard(1)],
                continuation_token: Some("token-a".into()),
            }),
            Scripted::Page(Page {
                shards: vec![shard(2)],
                continuation_token: None,
            }),
        ]);

        let first = client
            .list_shards(PageRequest::First {
                stream_name: "my-stream".into(),
                stream_arn: None,
                max_results: 1000,
            })
            .await
            .unwrap();
        assert!(!first.is_last());
        assert_eq!(first.shards[0].shard_id, ShardId(1));

        let second = client
            .list_shards(PageRequest::Next {
                continuation_token: "token-a".into(),
                max_results: 1000,
            })
            .await
            .unwrap();
        assert!(second.is_last());
        assert_eq!(second.shards[0].shard_id, ShardId(2));

        assert_eq!(client.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn mock_client_reports_a_scripted_failure() {
        let client = MockTopologyClient::new(vec![Scripted::Fail]);
        let result = client
            .list_shards(PageRequest::First {
                stream_name: "my-stream".into(),
                stream_arn: None,
                max_results: 1000,
            })
            .await;
        assert!(result.is_err());
    }
}
