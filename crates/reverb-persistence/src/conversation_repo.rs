use async_trait::async_trait;
use reverb_models::Conversation;
use uuid::Uuid;

use crate::Result;

/// Written by the Conversation Monitor (creation, live updates until
/// close) then by the post-conversation chain's stages one at a time in
/// dependency order — concurrent writes between those stages must not
/// interleave on the same document, so ordering rather than locking is
/// what keeps them safe. `mutate` is the single read-modify-write
/// primitive every caller goes through, so that ordering guarantee
/// lives in one place.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conversation: Conversation) -> Result<()>;
    async fn get(&self, conversation_id: Uuid) -> Result<Conversation>;
    async fn try_get(&self, conversation_id: Uuid) -> Result<Option<Conversation>>;

    /// Read-modify-write under the caller's exclusive turn (dependency
    /// order in the post-conversation chain, or the monitor's own
    /// single-writer tick loop before close).
    async fn mutate(
        &self,
        conversation_id: Uuid,
        f: Box<dyn FnOnce(&mut Conversation) + Send>,
    ) -> Result<Conversation>;
}
