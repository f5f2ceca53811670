use async_trait::async_trait;

/// One strategy for answering a question about a context `C`.
#[async_trait]
pub trait Resolver<C>: Send + Sync
where
    C: ?Sized + Sync,
{
    /// Returns an answer, or `None` to let the next resolver try.
    async fn resolve(&self, cx: &C) -> Option<String>;
}

#[async_trait]
impl<C, F> Resolver<C> for F
where
    C: ?Sized + Sync,
    F: Fn(&C) -> Option<String> + Send + Sync,
{
    #[inline]
    async fn resolve(&self, cx: &C) -> Option<String> {
        self(cx)
    }
}

/// An ordered list of resolvers. The first answer wins.
///
/// Handlers use it to ask a delegate agent first and fall back to cheap
/// local heuristics:
///
/// ```ignore
/// let answer = ResolutionChain::new()
///     .then(AskCodeChat::new("What is the Python version of this repo?"))
///     .then(|repo: &Repository| python_version(&repo.path))
///     .resolve(&repo)
///     .await;
/// ```
pub struct ResolutionChain<'a, C: ?Sized> {
    resolvers: Vec<Box<dyn Resolver<C> + 'a>>,
}

impl<C: ?Sized> Default for ResolutionChain<'_, C> {
    #[inline]
    fn default() -> Self {
        Self { resolvers: vec![] }
    }
}

impl<'a, C: ?Sized + Sync> ResolutionChain<'a, C> {
    /// Creates an empty chain.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a resolver.
    #[inline]
    pub fn then<R: Resolver<C> + 'a>(mut self, resolver: R) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    /// Returns the number of resolvers.
    #[inline]
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Returns `true` if the chain has no resolver.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Asks each resolver in order and returns the first answer.
    pub async fn resolve(&self, cx: &C) -> Option<String> {
        for (idx, resolver) in self.resolvers.iter().enumerate() {
            if let Some(answer) = resolver.resolve(cx).await {
                trace!("resolved by resolver #{idx}");
                return Some(answer);
            }
        }
        trace!("no resolver could answer");
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counting<'a> {
        calls: &'a AtomicUsize,
        answer: Option<&'static str>,
    }

    #[async_trait]
    impl Resolver<str> for Counting<'_> {
        async fn resolve(&self, _cx: &str) -> Option<String> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.answer.map(str::to_owned)
        }
    }

    #[tokio::test]
    async fn test_first_answer_wins() {
        let calls = AtomicUsize::new(0);
        let chain = ResolutionChain::<str>::new()
            .then(|cx: &str| cx.strip_prefix("version:").map(str::to_owned))
            .then(Counting {
                calls: &calls,
                answer: Some("3.9"),
            })
            .then(Counting {
                calls: &calls,
                answer: Some("3.11"),
            });
        assert_eq!(chain.len(), 3);

        assert_eq!(chain.resolve("version:3.8").await.as_deref(), Some("3.8"));
        assert_eq!(calls.load(Ordering::Relaxed), 0);

        assert_eq!(chain.resolve("no hint").await.as_deref(), Some("3.9"));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_nothing_resolved() {
        let calls = AtomicUsize::new(0);
        let chain = ResolutionChain::<str>::new().then(Counting {
            calls: &calls,
            answer: None,
        });
        assert_eq!(chain.resolve("anything").await, None);
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        let empty = ResolutionChain::<str>::new();
        assert!(empty.is_empty());
        assert_eq!(empty.resolve("anything").await, None);
    }
}
