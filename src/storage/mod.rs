pub mod session_store;

pub use session_store::{FileTokenStore, TokenStore};

#[cfg(test)]
pub use memory::MemoryTokenStore;

#[cfg(test)]
mod memory {
    use std::sync::{Arc, Mutex};

    use super::TokenStore;
    use crate::core::errors::SessionError;
    use crate::core::session::Session;

    /// Shared in-memory store; clones see the same slot.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryTokenStore {
        slot: Arc<Mutex<Option<Session>>>,
    }

    impl TokenStore for MemoryTokenStore {
        fn load(&self) -> Result<Option<Session>, SessionError> {
            Ok(self.slot.lock().unwrap().clone())
        }

        fn save(&self, session: &Session) -> Result<(), SessionError> {
            *self.slot.lock().unwrap() = Some(session.clone());
            Ok(())
        }

        fn clear(&self) -> Result<(), SessionError> {
            *self.slot.lock().unwrap() = None;
            Ok(())
        }
    }
}
