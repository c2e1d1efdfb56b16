//! Fan-out helpers
//!
//! Runs N independent queries concurrently and collects their results in input
//! order. Two failure policies are provided:
//!
//! - **strict** ([`join_strict`]): the aggregate fails when any member fails
//! - **settled** ([`settle`], [`join_settled`]): each member catches its own
//!   failure, logs it with a diagnostic tag and substitutes an empty value
//!
//! The assemblers use the settled policy: partial success is success.

use crate::error::{QueryError, QueryResult};
use futures::future::{join_all, try_join_all};
use std::future::Future;
use tracing::warn;

/// Await every future concurrently; output order matches input order
pub async fn join_ordered<I, F, T>(tasks: I) -> Vec<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = T>,
{
    join_all(tasks).await
}

/// Await every future concurrently, failing on the first member error
pub async fn join_strict<I, F, T>(tasks: I) -> QueryResult<Vec<T>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = QueryResult<T>>,
{
    try_join_all(tasks).await
}

/// Await one member, replacing a failure with `T::default()`
pub async fn settle<F, T>(tag: &str, task: F) -> T
where
    F: Future<Output = QueryResult<T>>,
    T: Default,
{
    match task.await {
        Ok(value) => value,
        Err(e) => {
            warn!(tag, error = %e, "Query failed, substituting empty result");
            T::default()
        }
    }
}

/// Like [`settle`], but also hands back the error for status reporting
pub async fn settle_with_error<F, T>(tag: &str, task: F) -> (T, Option<QueryError>)
where
    F: Future<Output = QueryResult<T>>,
    T: Default,
{
    match task.await {
        Ok(value) => (value, None),
        Err(e) => {
            warn!(tag, error = %e, "Query failed, substituting empty result");
            (T::default(), Some(e))
        }
    }
}

/// Settled fan-out over a homogeneous set of members
pub async fn join_settled<I, F, T>(tag: &str, tasks: I) -> Vec<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = QueryResult<T>>,
    T: Default,
{
    join_all(tasks.into_iter().map(|task| settle(tag, task))).await
}

/// First error among settled members, if any
pub fn first_error<const N: usize>(errors: [Option<QueryError>; N]) -> Option<QueryError> {
    errors.into_iter().flatten().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn delayed(value: u32, delay_ms: u64) -> u32 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        value
    }

    async fn maybe_fail(value: u32, fail: bool) -> QueryResult<u32> {
        if fail {
            Err(QueryError::Transport(format!("member {} failed", value)))
        } else {
            Ok(value)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_independent_of_completion() {
        let results = join_ordered(vec![delayed(1, 30), delayed(2, 10), delayed(3, 20)]).await;
        assert_eq!(results, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_strict_fails_on_any_member() {
        let result = join_strict(vec![maybe_fail(1, false), maybe_fail(2, true), maybe_fail(3, false)]).await;
        assert!(matches!(result, Err(QueryError::Transport(_))));

        let result = join_strict(vec![maybe_fail(1, false), maybe_fail(2, false)]).await;
        assert_eq!(result.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_settled_substitutes_default() {
        let results = join_settled(
            "members",
            vec![maybe_fail(1, false), maybe_fail(2, true), maybe_fail(3, false)],
        )
        .await;
        assert_eq!(results, vec![1, 0, 3]);
    }

    #[tokio::test]
    async fn test_settle_with_error_reports() {
        let (value, err) = settle_with_error("one", maybe_fail(7, true)).await;
        assert_eq!(value, 0);
        assert!(err.is_some());

        let first = first_error([None, err, Some(QueryError::Shape("later".into()))]);
        assert!(matches!(first, Some(QueryError::Transport(_))));
    }
}
