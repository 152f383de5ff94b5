use std::sync::Arc;

use threadline_types::models::PrincipalId;
use tokio::sync::watch;

/// Who is signed in. The sign-in flow itself lives elsewhere.
pub trait Identity: Send + Sync {
    fn current_principal(&self) -> Option<PrincipalId>;

    /// Observe sign-in and sign-out.
    fn on_principal_changed(&self) -> watch::Receiver<Option<PrincipalId>>;
}

/// In-process identity holder.
#[derive(Clone)]
pub struct AuthState {
    principal: Arc<watch::Sender<Option<PrincipalId>>>,
}

impl AuthState {
    pub fn signed_out() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            principal: Arc::new(tx),
        }
    }

    pub fn signed_in(principal: PrincipalId) -> Self {
        let state = Self::signed_out();
        state.sign_in(principal);
        state
    }

    pub fn sign_in(&self, principal: PrincipalId) {
        self.principal.send_replace(Some(principal));
    }

    pub fn sign_out(&self) {
        self.principal.send_replace(None);
    }
}

impl Identity for AuthState {
    fn current_principal(&self) -> Option<PrincipalId> {
        self.principal.borrow().clone()
    }

    fn on_principal_changed(&self) -> watch::Receiver<Option<PrincipalId>> {
        self.principal.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn observers_see_sign_out() {
        let auth = AuthState::signed_in(PrincipalId::new("alice"));
        let mut changes = auth.on_principal_changed();
        assert_eq!(auth.current_principal(), Some(PrincipalId::new("alice")));

        auth.sign_out();
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow(), None);
    }
}
