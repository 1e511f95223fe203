//! Material Resolver: turns user input into a validated [`MaterialRecord`].

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ApiError, MatlitError};
use crate::retry::RetryPolicy;
use crate::types::{MaterialId, MaterialRecord};

/// A materials database that can describe a material by ID.
#[async_trait]
pub trait MaterialSource: Send + Sync {
    /// Fetch the record for `id`. Unknown IDs answer `ApiError::NotFound`.
    async fn fetch(&self, id: &MaterialId) -> Result<MaterialRecord, ApiError>;
}

pub struct MaterialResolver {
    source: Arc<dyn MaterialSource>,
    retry: RetryPolicy,
}

impl MaterialResolver {
    pub fn new(source: Arc<dyn MaterialSource>, retry: RetryPolicy) -> Self {
        Self { source, retry }
    }

    /// Normalize `raw` and look the material up.
    pub async fn resolve(&self, raw: &str) -> Result<MaterialRecord, MatlitError> {
        let id = MaterialId::parse(raw)?;
        info!(material_id = %id, "Resolving material");

        match self
            .retry
            .run("material_lookup", || self.source.fetch(&id))
            .await
        {
            Ok(record) => {
                info!(
                    material_id = %record.material_id,
                    formula = %record.formula,
                    "Material resolved"
                );
                Ok(record)
            }
            Err(ApiError::NotFound { .. }) => Err(MatlitError::MaterialNotFound {
                material_id: id.to_string(),
            }),
            Err(e) => {
                warn!(material_id = %id, error = %e, "Material lookup failed");
                Err(MatlitError::Api(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeSource {
        responses: Mutex<Vec<Result<MaterialRecord, ApiError>>>,
        seen: Mutex<Vec<MaterialId>>,
    }

    impl FakeSource {
        fn new(responses: Vec<Result<MaterialRecord, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MaterialSource for FakeSource {
        async fn fetch(&self, id: &MaterialId) -> Result<MaterialRecord, ApiError> {
            self.seen.lock().unwrap().push(id.clone());
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn yfeo3() -> MaterialRecord {
        MaterialRecord::new(MaterialId::parse("mp-20738").unwrap(), "YFeO3")
    }

    #[tokio::test]
    async fn test_resolve_normalizes_input() {
        let source = FakeSource::new(vec![Ok(yfeo3())]);
        let resolver = MaterialResolver::new(source.clone(), RetryPolicy::immediate(3));
        let record = resolver.resolve("20738").await.unwrap();
        assert_eq!(record.formula, "YFeO3");
        assert_eq!(source.seen.lock().unwrap()[0].as_str(), "mp-20738");
    }

    #[tokio::test]
    async fn test_invalid_id_never_calls_source() {
        let source = FakeSource::new(vec![]);
        let resolver = MaterialResolver::new(source.clone(), RetryPolicy::immediate(3));
        let err = resolver.resolve("iron").await.unwrap_err();
        assert!(matches!(err, MatlitError::InvalidMaterialId { .. }));
        assert!(source.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_is_distinct() {
        let source = FakeSource::new(vec![Err(ApiError::NotFound {
            provider: "materials_project".into(),
            what: "mp-999999999".into(),
        })]);
        let resolver = MaterialResolver::new(source, RetryPolicy::immediate(3));
        let err = resolver.resolve("mp-999999999").await.unwrap_err();
        match err {
            MatlitError::MaterialNotFound { material_id } => {
                assert_eq!(material_id, "mp-999999999")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let source = FakeSource::new(vec![
            Err(ApiError::Server {
                provider: "materials_project".into(),
                status: 502,
            }),
            Ok(yfeo3()),
        ]);
        let resolver = MaterialResolver::new(source.clone(), RetryPolicy::immediate(3));
        assert!(resolver.resolve("mp-20738").await.is_ok());
        assert_eq!(source.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_surfaces_as_api_error() {
        let source = FakeSource::new(vec![Err(ApiError::AuthFailed {
            provider: "materials_project".into(),
            status: 401,
        })]);
        let resolver = MaterialResolver::new(source, RetryPolicy::immediate(3));
        let err = resolver.resolve("mp-1").await.unwrap_err();
        assert!(matches!(err, MatlitError::Api(ApiError::AuthFailed { .. })));
    }
}
