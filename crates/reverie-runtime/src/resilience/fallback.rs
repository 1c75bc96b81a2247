//! Fallback chains tried in order.
//!
//! Order: Primary -> Secondary -> Tertiary -> Static. The static tier is
//! a plain closure and cannot fail, so a chain that carries one always
//! resolves.

use futures::future::BoxFuture;
use reverie_core::ResponseSource;
use std::fmt::Display;

/// One fallible tier of a chain.
pub type Tier<'a, T, E> = BoxFuture<'a, Result<T, E>>;

/// The infallible last tier.
pub type StaticTier<'a, T> = Box<dyn FnOnce() -> T + Send + 'a>;

/// Value produced by a chain, tagged with the tier that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackOutcome<T> {
    /// The produced value
    pub value: T,
    /// Tier that produced it
    pub source: ResponseSource,
}

impl<T> FallbackOutcome<T> {
    /// Whether a tier other than the primary answered.
    pub fn is_degraded(&self) -> bool {
        self.source.is_degraded()
    }
}

/// Builder for an ordered set of alternatives.
///
/// Tiers are futures that have not been polled yet; a tier runs only if
/// every tier before it failed.
pub struct FallbackChain<'a, T, E> {
    primary: Tier<'a, T, E>,
    alternatives: Vec<(ResponseSource, Tier<'a, T, E>)>,
    static_fallback: Option<StaticTier<'a, T>>,
}

impl<'a, T, E: Display> FallbackChain<'a, T, E> {
    /// Start a chain with the primary tier.
    pub fn new(primary: Tier<'a, T, E>) -> Self {
        Self {
            primary,
            alternatives: Vec::new(),
            static_fallback: None,
        }
    }

    /// Tried after the primary fails.
    pub fn secondary(mut self, tier: Tier<'a, T, E>) -> Self {
        self.alternatives.push((ResponseSource::Secondary, tier));
        self
    }

    /// Tried after the secondary fails.
    pub fn tertiary(mut self, tier: Tier<'a, T, E>) -> Self {
        self.alternatives.push((ResponseSource::Tertiary, tier));
        self
    }

    /// Last resort. Never fails.
    pub fn or_static(mut self, fallback: impl FnOnce() -> T + Send + 'a) -> Self {
        self.static_fallback = Some(Box::new(fallback));
        self
    }

    /// Number of fallible tiers, primary included.
    pub fn len(&self) -> usize {
        1 + self.alternatives.len()
    }

    /// Check if a static last resort is set.
    pub fn has_static(&self) -> bool {
        self.static_fallback.is_some()
    }

    /// Run tiers in order until one succeeds.
    ///
    /// Without a static tier, the error from the last tier that actually
    /// ran is returned.
    pub async fn execute(self) -> Result<FallbackOutcome<T>, E> {
        let mut last_error = match self.primary.await {
            Ok(value) => {
                return Ok(FallbackOutcome {
                    value,
                    source: ResponseSource::Primary,
                })
            }
            Err(e) => {
                tracing::warn!(tier = %ResponseSource::Primary, error = %e, "Fallback tier failed");
                e
            }
        };

        for (source, tier) in self.alternatives {
            match tier.await {
                Ok(value) => {
                    tracing::info!(tier = %source, "Fallback tier succeeded");
                    return Ok(FallbackOutcome { value, source });
                }
                Err(e) => {
                    tracing::warn!(tier = %source, error = %e, "Fallback tier failed");
                    last_error = e;
                }
            }
        }

        match self.static_fallback {
            Some(fallback) => {
                tracing::warn!(tier = %ResponseSource::Static, "Using static fallback");
                Ok(FallbackOutcome {
                    value: fallback(),
                    source: ResponseSource::Static,
                })
            }
            None => Err(last_error),
        }
    }
}

/// Try `primary`, then each supplied alternative, then `static_fallback`.
pub async fn execute_with_fallback<'a, T, E: Display>(
    primary: Tier<'a, T, E>,
    secondary: Option<Tier<'a, T, E>>,
    tertiary: Option<Tier<'a, T, E>>,
    static_fallback: Option<StaticTier<'a, T>>,
) -> Result<FallbackOutcome<T>, E> {
    let mut chain = FallbackChain::new(primary);
    if let Some(tier) = secondary {
        chain = chain.secondary(tier);
    }
    if let Some(tier) = tertiary {
        chain = chain.tertiary(tier);
    }
    chain.static_fallback = static_fallback;
    chain.execute().await
}
