//! The restricted data store.
//!
//! A fixed table split into an unrestricted region (always lawful to read)
//! and a restricted region holding the simulated secret. The only exposed
//! accessor refuses to address the restricted region, so restricted bytes can
//! only surface through side effects of speculative execution.

use crate::util::{RESTRICTED_SIZE, UNRESTRICTED_SIZE, make_vec};
use log::info;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

/// Errors raised while populating the store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The secret does not fit into the restricted region.
    #[error("Input restricted code of {len} bytes exceeds available size of {capacity}")]
    InputTooLarge {
        /// Length of the rejected secret
        len: usize,
        /// Size of the restricted region
        capacity: usize,
    },
    /// The unrestricted region cannot be identity-mapped to bytes.
    #[error("Unrestricted region of {unrestricted} entries exceeds the maximum of {max}")]
    LayoutTooLarge {
        /// Requested unrestricted size
        unrestricted: usize,
        /// Largest supported unrestricted size
        max: usize,
    },
}

/// Largest unrestricted region whose identity values fit a `u8`.
pub(crate) const MAX_UNRESTRICTED: usize = 256;

/// Sizes of the two store regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLayout {
    /// Size of the unrestricted region (U). At most 256 so that identity values fit a byte.
    pub unrestricted: usize,
    /// Size of the restricted region (R)
    pub restricted: usize,
}

impl Default for StoreLayout {
    fn default() -> Self {
        StoreLayout {
            unrestricted: UNRESTRICTED_SIZE,
            restricted: RESTRICTED_SIZE,
        }
    }
}

impl StoreLayout {
    /// Indices of the restricted region within the combined table.
    pub fn restricted_range(&self) -> Range<usize> {
        self.unrestricted..self.unrestricted + self.restricted
    }

    /// `true` if `index` addresses the restricted region.
    pub fn is_restricted(&self, index: usize) -> bool {
        self.restricted_range().contains(&index)
    }
}

/// Two-part table of known-safe values followed by secret bytes.
#[derive(Debug, Clone)]
pub struct RestrictedStore {
    layout: StoreLayout,
    data: Vec<u8>,
}

impl RestrictedStore {
    /// Creates a zero-filled store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LayoutTooLarge`] if the unrestricted region has
    /// more than 256 entries, since its identity values must fit a byte.
    pub fn new(layout: StoreLayout) -> Result<Self, StoreError> {
        if layout.unrestricted > MAX_UNRESTRICTED {
            return Err(StoreError::LayoutTooLarge {
                unrestricted: layout.unrestricted,
                max: MAX_UNRESTRICTED,
            });
        }
        Ok(RestrictedStore {
            layout,
            data: vec![0; layout.unrestricted + layout.restricted],
        })
    }

    /// The region sizes of this store.
    pub fn layout(&self) -> StoreLayout {
        self.layout
    }

    /// Fills the unrestricted region with `0..U` and the restricted region
    /// with `secret`, zero padded to `R`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InputTooLarge`] without touching the table if
    /// `secret` is longer than the restricted region.
    pub fn prepare(&mut self, secret: &[u8]) -> Result<(), StoreError> {
        let StoreLayout {
            unrestricted,
            restricted,
        } = self.layout;
        if secret.len() > restricted {
            return Err(StoreError::InputTooLarge {
                len: secret.len(),
                capacity: restricted,
            });
        }
        self.data[..unrestricted].copy_from_slice(&make_vec(unrestricted, |i| i as u8));
        let region = &mut self.data[unrestricted..];
        region[..secret.len()].copy_from_slice(secret);
        region[secret.len()..].fill(0);
        info!("Set restricted to: {:?}", self.restricted_view());
        Ok(())
    }

    /// Returns the stored value for `index < U`, else `0`.
    #[inline]
    pub fn read_unrestricted(&self, index: usize) -> u8 {
        if index < self.layout.unrestricted {
            return self.data[index];
        }
        0
    }

    /// `true` if `index` addresses the restricted region.
    pub fn is_restricted(&self, index: usize) -> bool {
        self.layout.is_restricted(index)
    }

    /// Ground truth of the restricted region, for reporting after an experiment.
    pub(crate) fn restricted_view(&self) -> &[u8] {
        &self.data[self.layout.unrestricted..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared(secret: &[u8]) -> RestrictedStore {
        let mut store = RestrictedStore::new(StoreLayout::default()).unwrap();
        store.prepare(secret).unwrap();
        store
    }

    #[test]
    fn test_unrestricted_identity() {
        let store = prepared(b"ABCDEFGHIJ");
        for i in 0..UNRESTRICTED_SIZE {
            assert_eq!(store.read_unrestricted(i), i as u8);
        }
    }

    #[test]
    fn test_restricted_reads_are_zero() {
        let store = prepared(b"ABCDEFGHIJ");
        for i in UNRESTRICTED_SIZE..UNRESTRICTED_SIZE + RESTRICTED_SIZE + 100 {
            assert_eq!(store.read_unrestricted(i), 0, "index {i} leaked");
        }
    }

    #[test]
    fn test_input_too_large() {
        let mut store = RestrictedStore::new(StoreLayout::default()).unwrap();
        store.prepare(b"xyz").unwrap();
        let err = store.prepare(b"ABCDEFGHIJK").unwrap_err();
        assert_eq!(
            err,
            StoreError::InputTooLarge {
                len: 11,
                capacity: 10
            }
        );
        // rejected input leaves the table as it was
        assert_eq!(&store.restricted_view()[..3], b"xyz");
    }

    #[test]
    fn test_exact_fit_has_no_padding() {
        let store = prepared(b"ABCDEFGHIJ");
        assert_eq!(store.restricted_view(), b"ABCDEFGHIJ");
    }

    #[test]
    fn test_short_secret_is_zero_padded() {
        let mut store = prepared(b"ABCDEFGHIJ");
        store.prepare(b"hi").unwrap();
        assert_eq!(store.restricted_view(), b"hi\0\0\0\0\0\0\0\0");
    }

    #[test]
    fn test_oversized_layout_is_rejected() {
        let layout = StoreLayout {
            unrestricted: 257,
            restricted: 1,
        };
        assert_eq!(
            RestrictedStore::new(layout).unwrap_err(),
            StoreError::LayoutTooLarge {
                unrestricted: 257,
                max: 256
            }
        );
        let layout = StoreLayout {
            unrestricted: 256,
            restricted: 1,
        };
        let mut store = RestrictedStore::new(layout).unwrap();
        store.prepare(b"z").unwrap();
        assert_eq!(store.read_unrestricted(255), 255);
    }

    #[test]
    fn test_restricted_range() {
        let layout = StoreLayout {
            unrestricted: 4,
            restricted: 2,
        };
        assert!(!layout.is_restricted(3));
        assert!(layout.is_restricted(4));
        assert!(layout.is_restricted(5));
        assert!(!layout.is_restricted(6));
    }
}
