/*
 * Client contexts for the two sides of the copy.
 *
 * Each side resolves its own credentials, endpoint and connection limit.
 * In cross-account mode both sides must name a credential profile.
 */

use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::Client;
use copy_common::{CopyConfig, CopyError, OperationalConfig, Result, TableEndpoint, TableRole};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Where a client's credentials come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Environment, shared config, instance metadata, ...
    DefaultChain,
    /// A named profile from the shared config files
    Profile(String),
}

/// Everything needed to build one side's client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub role: TableRole,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub credentials: CredentialSource,
    pub max_connections: usize,
}

impl ClientContext {
    fn from_endpoint(
        role: TableRole,
        endpoint: &TableEndpoint,
        credentials: CredentialSource,
        max_connections: usize,
    ) -> Self {
        let endpoint_url = endpoint
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .map(normalize_endpoint);
        let region = endpoint_url.as_deref().and_then(region_from_endpoint);

        Self {
            role,
            endpoint: endpoint_url,
            region,
            credentials,
            max_connections,
        }
    }
}

/// Resolves the source and destination client contexts.
///
/// Nothing is contacted here; a missing profile fails before any client exists.
pub fn resolve_client_contexts(
    config: &CopyConfig,
    operational: &OperationalConfig,
) -> Result<(ClientContext, ClientContext)> {
    let (source_creds, destination_creds) = if config.cross_account {
        (
            required_profile(TableRole::Source, &config.source)?,
            required_profile(TableRole::Destination, &config.destination)?,
        )
    } else {
        (CredentialSource::DefaultChain, CredentialSource::DefaultChain)
    };

    Ok((
        ClientContext::from_endpoint(
            TableRole::Source,
            &config.source,
            source_creds,
            operational.max_connections,
        ),
        ClientContext::from_endpoint(
            TableRole::Destination,
            &config.destination,
            destination_creds,
            operational.max_connections,
        ),
    ))
}

fn required_profile(role: TableRole, endpoint: &TableEndpoint) -> Result<CredentialSource> {
    match endpoint.profile.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Ok(CredentialSource::Profile(name.to_string())),
        _ => Err(CopyError::Configuration {
            side: role,
            message: format!("cross-account mode requires a {} profile", role),
        }),
    }
}

/// Adds an https scheme to bare hosts.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}

/// Extracts the region from regional endpoints such as
/// `https://dynamodb.eu-west-1.amazonaws.com`.
pub fn region_from_endpoint(endpoint: &str) -> Option<String> {
    let host = endpoint
        .split_once("://")
        .map_or(endpoint, |(_, rest)| rest)
        .split(['/', ':'])
        .next()?;

    let mut labels = host.split('.');
    match (labels.next(), labels.next(), labels.next()) {
        (Some("dynamodb"), Some(region), Some("amazonaws")) => Some(region.to_string()),
        _ => None,
    }
}

/// A DynamoDB client with a bound on in-flight requests.
#[derive(Clone)]
pub struct DynamoDbClient {
    client: Client,
    permits: Arc<Semaphore>,
    role: TableRole,
}

impl DynamoDbClient {
    /// Builds a client from a resolved context.
    pub async fn connect(context: &ClientContext) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let CredentialSource::Profile(name) = &context.credentials {
            loader = loader.profile_name(name);
        }
        if let Some(region) = &context.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_dynamodb::config::Builder::from(&shared);
        if let Some(endpoint) = &context.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        tracing::debug!(
            role = %context.role,
            endpoint = ?context.endpoint,
            region = ?context.region,
            max_connections = context.max_connections,
            "Built DynamoDB client"
        );

        Self::from_client(
            Client::from_conf(builder.build()),
            context.role,
            context.max_connections,
        )
    }

    /// Wraps an existing client.
    pub fn from_client(client: Client, role: TableRole, max_connections: usize) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
            role,
        }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Waits for a free connection slot.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| CopyError::Unexpected(format!("{} connection limiter closed", self.role)))
    }
}

const THROTTLING_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
];

const TRANSIENT_CODES: &[&str] = &["InternalServerError", "ServiceUnavailable"];

/// Maps an SDK error onto the copy error taxonomy.
pub fn classify_sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> CopyError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: Debug,
{
    let code = err.code().map(str::to_owned);
    let message = format!("{}: {}", operation, DisplayErrorContext(&err));

    match code.as_deref() {
        Some(c) if THROTTLING_CODES.contains(&c) => CopyError::Throttled(message),
        Some(c) if TRANSIENT_CODES.contains(&c) => CopyError::Communication(message),
        _ => match err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                CopyError::Communication(message)
            }
            _ => CopyError::Execution(message),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cross_account: bool, source_profile: Option<&str>, dest_profile: Option<&str>) -> CopyConfig {
        CopyConfig {
            source: TableEndpoint {
                endpoint: Some("dynamodb.us-west-2.amazonaws.com".into()),
                table: "orders".into(),
                profile: source_profile.map(Into::into),
            },
            destination: TableEndpoint {
                endpoint: Some("http://localhost:8000".into()),
                table: "orders_copy".into(),
                profile: dest_profile.map(Into::into),
            },
            cross_account,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_chain_without_cross_account() {
        let (source, dest) =
            resolve_client_contexts(&config(false, None, None), &OperationalConfig::default())
                .unwrap();

        assert_eq!(source.credentials, CredentialSource::DefaultChain);
        assert_eq!(dest.credentials, CredentialSource::DefaultChain);
        assert_eq!(
            source.endpoint.as_deref(),
            Some("https://dynamodb.us-west-2.amazonaws.com")
        );
        assert_eq!(source.region.as_deref(), Some("us-west-2"));
        assert_eq!(dest.region, None);
        assert_eq!(source.max_connections, 200);
    }

    #[test]
    fn test_cross_account_profiles() {
        let (source, dest) = resolve_client_contexts(
            &config(true, Some("prod"), Some("backup")),
            &OperationalConfig::default(),
        )
        .unwrap();
        assert_eq!(source.credentials, CredentialSource::Profile("prod".into()));
        assert_eq!(dest.credentials, CredentialSource::Profile("backup".into()));
    }

    #[test]
    fn test_cross_account_missing_profiles() {
        let ops = OperationalConfig::default();

        let err = resolve_client_contexts(&config(true, None, Some("backup")), &ops).unwrap_err();
        assert_eq!(err.exit_code(), 99);

        let err = resolve_client_contexts(&config(true, Some("prod"), Some("  ")), &ops).unwrap_err();
        assert!(matches!(
            err,
            CopyError::Configuration {
                side: TableRole::Destination,
                ..
            }
        ));
        assert_eq!(err.exit_code(), 98);

        // Source is checked first.
        let err = resolve_client_contexts(&config(true, None, None), &ops).unwrap_err();
        assert_eq!(err.exit_code(), 99);
    }

    #[test]
    fn test_endpoint_helpers() {
        assert_eq!(normalize_endpoint("localhost:8000"), "https://localhost:8000");
        assert_eq!(normalize_endpoint("http://localhost:8000"), "http://localhost:8000");
        assert_eq!(
            region_from_endpoint("https://dynamodb.ap-southeast-2.amazonaws.com/"),
            Some("ap-southeast-2".into())
        );
        assert_eq!(region_from_endpoint("http://localhost:8000"), None);
        assert_eq!(region_from_endpoint("https://example.com"), None);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let conf = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1"))
            .build();
        let client = DynamoDbClient::from_client(Client::from_conf(conf), TableRole::Source, 1);

        let first = client.acquire().await.unwrap();
        assert_eq!(client.permits.available_permits(), 0);
        drop(first);
        assert_eq!(client.permits.available_permits(), 1);
    }
}
