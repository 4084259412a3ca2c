//! Request identities and the resolver that derives them.
//!
//! Two submissions compete with each other exactly when they resolve to the
//! same [`RequestIdentity`]. Identities live in three namespaces so that one
//! source can never alias another:
//!
//! | Prefix | Source |
//! |--------|--------|
//! | `key:` | explicit [`RequestKey`] supplied by the caller |
//! | `url:` | the target with scheme, query string and fragment removed |
//! | `solo:` | suppressed submissions; unique per call |

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BoxError;

const KEY_PREFIX: &str = "key:";
const URL_PREFIX: &str = "url:";
const SOLO_PREFIX: &str = "solo:";

/// Sequence mixed into suppressed identities alongside a random UUID.
static SOLO_SEQUENCE: AtomicU64 = AtomicU64::new(0);

// ---------------------------------------------------------------------------
// RequestIdentity
// ---------------------------------------------------------------------------

/// Stable string identity of a logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestIdentity(String);

impl RequestIdentity {
    /// Identity for an explicit key literal.
    pub fn for_key(key: impl fmt::Display) -> Self {
        Self(format!("{KEY_PREFIX}{key}"))
    }

    /// Identity derived from a URL-like target.
    ///
    /// `https://h/api/x?y=1#z`, `https://h/api/x?y=2` and `h/api/x` all map to
    /// the same identity.
    pub fn for_url(target: &str) -> Self {
        Self(format!("{URL_PREFIX}{}", clean_url(target)))
    }

    /// A fresh identity that no other call will ever share.
    pub fn unique() -> Self {
        let seq = SOLO_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("{SOLO_PREFIX}{seq}-{}", Uuid::new_v4()))
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this identity was minted for a suppressed call.
    pub fn is_unique(&self) -> bool {
        self.0.starts_with(SOLO_PREFIX)
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Explicit keys
// ---------------------------------------------------------------------------

/// Literal value of an explicit request key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyLiteral {
    /// A string key.
    Text(String),
    /// A numeric key.
    Number(i64),
}

impl fmt::Display for KeyLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Function computing a key at submission time.
pub type KeyProducer = Arc<dyn Fn() -> Result<KeyLiteral, BoxError> + Send + Sync>;

/// An explicit key: either a literal or a producer evaluated on each submit.
#[derive(Clone)]
pub enum RequestKey {
    /// A fixed key.
    Literal(KeyLiteral),
    /// Evaluated when the request is submitted. A failing producer is treated
    /// as if no key had been given.
    Producer(KeyProducer),
}

impl RequestKey {
    /// Wraps a key-producing function.
    pub fn producer<F>(f: F) -> Self
    where
        F: Fn() -> Result<KeyLiteral, BoxError> + Send + Sync + 'static,
    {
        Self::Producer(Arc::new(f))
    }

    /// Evaluates the key. Producer failures are logged and yield `None`.
    pub fn evaluate(&self) -> Option<KeyLiteral> {
        match self {
            Self::Literal(literal) => Some(literal.clone()),
            Self::Producer(produce) => match produce() {
                Ok(literal) => Some(literal),
                Err(err) => {
                    tracing::debug!(error = %err, "request key producer failed; using target");
                    None
                }
            },
        }
    }
}

impl fmt::Debug for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(literal) => f.debug_tuple("Literal").field(literal).finish(),
            Self::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

impl From<&str> for RequestKey {
    fn from(value: &str) -> Self {
        Self::Literal(KeyLiteral::Text(value.to_owned()))
    }
}

impl From<String> for RequestKey {
    fn from(value: String) -> Self {
        Self::Literal(KeyLiteral::Text(value))
    }
}

impl From<i64> for RequestKey {
    fn from(value: i64) -> Self {
        Self::Literal(KeyLiteral::Number(value))
    }
}

impl From<KeyLiteral> for RequestKey {
    fn from(value: KeyLiteral) -> Self {
        Self::Literal(value)
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Derives the identity of a submission.
///
/// Precedence: suppression, then an explicit key that evaluates successfully,
/// then the cleaned target.
pub fn resolve(target: &str, key: Option<&RequestKey>, suppress: bool) -> RequestIdentity {
    if suppress {
        return RequestIdentity::unique();
    }
    match key.and_then(RequestKey::evaluate) {
        Some(literal) => RequestIdentity::for_key(literal),
        None => RequestIdentity::for_url(target),
    }
}

/// Strips a leading `scheme://`, then everything from the first `?` or `#`.
pub fn clean_url(target: &str) -> &str {
    let rest = match target.find("://") {
        Some(idx) if is_scheme(&target[..idx]) => &target[idx + 3..],
        _ => target,
    };
    let end = rest.find(|c: char| c == '?' || c == '#').unwrap_or(rest.len());
    &rest[..end]
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}
