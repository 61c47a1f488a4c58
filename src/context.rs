//! The wired-up application: configuration, store, renderer and fetcher.
//!
//! Built once at startup and shared by reference (or `Arc`) with every
//! request. Holds no mutable state.

use crate::config::PlanmarkConfig;
use crate::error::PlanmarkError;
use crate::model::PlanRecord;
use crate::pipeline::availability::BackendAvailability;
use crate::pipeline::compose::MarkerGlyph;
use crate::pipeline::fetch::{AssetTransport, RemoteAssetFetcher, ReqwestTransport};
use crate::pipeline::input;
use crate::pipeline::photos::PhotoResolver;
use crate::pipeline::selector::BackendSelector;
use crate::render::PinRenderer;
use crate::store::PlanStore;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Planmark {
    config: PlanmarkConfig,
    store: Arc<dyn PlanStore>,
    renderer: PinRenderer,
    fetcher: RemoteAssetFetcher,
    photos: PhotoResolver,
}

impl Planmark {
    /// Probe the host's backends and wire everything with defaults.
    pub fn new(config: PlanmarkConfig, store: Arc<dyn PlanStore>) -> Self {
        Self::builder(config, store).build()
    }

    pub fn builder(config: PlanmarkConfig, store: Arc<dyn PlanStore>) -> PlanmarkBuilder {
        PlanmarkBuilder {
            config,
            store,
            availability: None,
            selector: None,
            glyph: None,
            transport: None,
        }
    }

    pub fn config(&self) -> &PlanmarkConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn PlanStore {
        self.store.as_ref()
    }

    pub fn renderer(&self) -> &PinRenderer {
        &self.renderer
    }

    pub fn fetcher(&self) -> &RemoteAssetFetcher {
        &self.fetcher
    }

    pub fn photos(&self) -> &PhotoResolver {
        &self.photos
    }

    /// Look a plan up, turning absence into [`PlanmarkError::PlanNotFound`].
    pub async fn plan(&self, plan_id: i64) -> Result<PlanRecord, PlanmarkError> {
        self.store
            .plan(plan_id)
            .await?
            .ok_or(PlanmarkError::PlanNotFound { plan_id })
    }

    /// The plan's PDF on disk, validated.
    pub fn plan_file(&self, plan: &PlanRecord) -> Result<PathBuf, PlanmarkError> {
        input::resolve_plan_file(&self.config.storage_root, plan)
    }
}

/// Builder for [`Planmark`]. Everything not set falls back to the real
/// implementation configured from [`PlanmarkConfig`].
pub struct PlanmarkBuilder {
    config: PlanmarkConfig,
    store: Arc<dyn PlanStore>,
    availability: Option<BackendAvailability>,
    selector: Option<BackendSelector>,
    glyph: Option<MarkerGlyph>,
    transport: Option<Arc<dyn AssetTransport>>,
}

impl PlanmarkBuilder {
    /// Use a known capability table instead of probing the host.
    pub fn availability(mut self, availability: BackendAvailability) -> Self {
        self.availability = Some(availability);
        self
    }

    /// Use a custom backend registry.
    pub fn selector(mut self, selector: BackendSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn glyph(mut self, glyph: MarkerGlyph) -> Self {
        self.glyph = Some(glyph);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn AssetTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Planmark {
        let config = self.config;
        let selector = match self.selector {
            Some(s) => s,
            None => {
                let availability = self
                    .availability
                    .unwrap_or_else(|| BackendAvailability::probe(&config));
                BackendSelector::from_config(&config, availability)
            }
        };
        let renderer = PinRenderer::new(
            Arc::new(selector),
            self.glyph.unwrap_or_default(),
            &config,
        );
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));
        let fetcher = RemoteAssetFetcher::new(transport, config.fetch.clone());
        let photos = PhotoResolver::from_config(&config);

        Planmark {
            config,
            store: self.store,
            renderer,
            fetcher,
            photos,
        }
    }
}
