//! Shared collaborator context.

use vgen_db::Db;
use vgen_media::MediaUploader;
use vgen_tokens::TokenPool;
use vgen_upstream::UpstreamClient;

use crate::config::OrchestratorConfig;

/// The collaborators every orchestrator component works against, injected
/// once at startup. Components never reach into each other's state; they
/// share only this context and the durable rows behind it.
pub struct Context {
    pub db: Db,
    pub tokens: TokenPool,
    pub upstream: UpstreamClient,
    pub media: MediaUploader,
    pub config: OrchestratorConfig,
}

impl Context {
    pub fn new(
        db: Db,
        tokens: TokenPool,
        upstream: UpstreamClient,
        media: MediaUploader,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            db,
            tokens,
            upstream,
            media,
            config,
        }
    }
}
