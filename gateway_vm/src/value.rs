use std::{fmt, future::Future};

use alloy::primitives::Bytes;
use futures::{
    future::{self, BoxFuture, Shared},
    FutureExt as _, TryFutureExt as _,
};

use crate::error::VmError;

pub type DeferredBytes = Shared<BoxFuture<'static, Result<Bytes, VmError>>>;

/// A stack or output value.
///
/// Storage reads and the transforms applied to them stay deferred until a
/// consuming op or output resolution forces them. Clones share the same
/// computation.
#[derive(Clone)]
pub enum MaybeBytes {
    Ready(Bytes),
    Deferred(DeferredBytes),
}

impl fmt::Debug for MaybeBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaybeBytes::Ready(b) => write!(f, "Ready({b})"),
            MaybeBytes::Deferred(d) => match d.peek() {
                Some(Ok(b)) => write!(f, "Deferred({b})"),
                Some(Err(e)) => write!(f, "Deferred(<{e}>)"),
                None => f.write_str("Deferred(<pending>)"),
            },
        }
    }
}

impl Default for MaybeBytes {
    fn default() -> Self {
        Self::Ready(Bytes::new())
    }
}

impl From<Bytes> for MaybeBytes {
    fn from(b: Bytes) -> Self {
        Self::Ready(b)
    }
}

impl MaybeBytes {
    pub fn deferred<F>(f: F) -> Self
    where
        F: Future<Output = Result<Bytes, VmError>> + Send + 'static,
    {
        Self::Deferred(f.boxed().shared())
    }

    /// A value that fails once forced.
    pub fn failed(e: VmError) -> Self {
        Self::deferred(future::err(e))
    }

    pub fn is_ready(&self) -> bool {
        match self {
            MaybeBytes::Ready(_) => true,
            MaybeBytes::Deferred(d) => matches!(d.peek(), Some(Ok(_))),
        }
    }

    pub async fn resolve(&self) -> Result<Bytes, VmError> {
        match self {
            MaybeBytes::Ready(b) => Ok(b.clone()),
            MaybeBytes::Deferred(d) => d.clone().await,
        }
    }

    /// Applies `f` to the value. Ready values are transformed right away but
    /// a failure still only surfaces when the result is forced.
    pub fn map<F>(self, f: F) -> Self
    where
        F: FnOnce(Bytes) -> Result<Bytes, VmError> + Send + 'static,
    {
        match self {
            MaybeBytes::Ready(b) => match f(b) {
                Ok(b) => Self::Ready(b),
                Err(e) => Self::failed(e),
            },
            MaybeBytes::Deferred(d) => Self::deferred(d.and_then(|b| future::ready(f(b)))),
        }
    }

    /// `a ++ b`.
    pub fn concat(a: MaybeBytes, b: MaybeBytes) -> Self {
        match (a, b) {
            (MaybeBytes::Ready(a), MaybeBytes::Ready(b)) => Self::Ready(concat_bytes(&[a, b])),
            (a, b) => Self::deferred(async move {
                let (a, b) = futures::try_join!(a.resolve(), b.resolve())?;
                Ok(concat_bytes(&[a, b]))
            }),
        }
    }

    /// Concatenates `parts` in order.
    pub fn concat_all(parts: Vec<MaybeBytes>) -> Self {
        if parts.iter().all(|p| matches!(p, MaybeBytes::Ready(_))) {
            let ready: Vec<Bytes> = parts
                .into_iter()
                .filter_map(|p| match p {
                    MaybeBytes::Ready(b) => Some(b),
                    MaybeBytes::Deferred(_) => None,
                })
                .collect();
            return Self::Ready(concat_bytes(&ready));
        }

        Self::deferred(async move {
            let parts = future::try_join_all(parts.iter().map(|p| p.resolve())).await?;
            Ok(concat_bytes(&parts))
        })
    }
}

pub(crate) fn concat_bytes(parts: &[Bytes]) -> Bytes {
    let mut v = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for p in parts {
        v.extend_from_slice(p);
    }
    v.into()
}

/// `v[offset..offset + length]`, failing outside of `v`.
pub(crate) fn slice_bytes(v: &Bytes, offset: usize, length: usize) -> Result<Bytes, VmError> {
    match offset.checked_add(length) {
        Some(end) if end <= v.len() => Ok(Bytes::from(v.0.slice(offset..end))),
        _ => Err(VmError::SliceOutOfBounds {
            offset,
            length,
            len: v.len(),
        }),
    }
}
