// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Capability returned by a successful open and required to close.
///
/// Two tokens are equal only if they come from the same mint, so a token
/// cannot be forged from its printed form.
#[derive(Clone)]
pub struct ServiceToken(Arc<Uuid>);

impl ServiceToken {
    pub(crate) fn mint() -> Self {
        ServiceToken(Arc::new(Uuid::new_v4()))
    }

    pub fn id(&self) -> Uuid {
        *self.0
    }
}

impl PartialEq for ServiceToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ServiceToken {}

impl fmt::Debug for ServiceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceToken").field(&*self.0).finish()
    }
}

impl fmt::Display for ServiceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_equality() {
        let a = ServiceToken::mint();
        let b = ServiceToken::mint();

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_same_id_is_not_enough() {
        let a = ServiceToken::mint();
        let forged = ServiceToken(Arc::new(a.id()));

        assert_eq!(a.to_string(), forged.to_string());
        assert_ne!(a, forged);
    }
}
