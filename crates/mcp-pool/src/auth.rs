//! Credential hooks consulted on every pool `get`, and the helper that
//! injects the server-preferred auth token into a derived context.

use std::sync::Arc;

use ag_domain::{ExecContext, Result, ServerToken};

use crate::client::ClientOptionsProvider;

/// OAuth-style request authorizer attached to newly constructed clients.
pub trait Authorizer: Send + Sync {
    /// The bearer token to attach, when one is available.
    fn bearer(&self) -> Option<String>;
}

/// Selects a per-user cookie jar from the ambient request context.
pub trait CookieJarProvider: Send + Sync {
    fn jar(&self, ctx: &ExecContext) -> Option<Arc<reqwest::cookie::Jar>>;
}

/// Selects an authorizer from the ambient request context.
pub trait AuthorizerProvider: Send + Sync {
    fn authorizer(&self, ctx: &ExecContext) -> Option<Arc<dyn Authorizer>>;
}

/// Derive a context carrying the token the server prefers (ID vs access),
/// read from the ambient [`ag_domain::AuthTokens`]. The context is returned
/// unchanged when the server is unknown or the token is missing.
pub async fn with_auth_token_context(
    ctx: &ExecContext,
    provider: &dyn ClientOptionsProvider,
    server: &str,
) -> Result<ExecContext> {
    let Some(options) = provider.options(ctx, server).await? else {
        return Ok(ctx.clone());
    };
    let Some(auth) = ctx.auth() else {
        return Ok(ctx.clone());
    };
    let (token, id_token) = if options.prefer_id_token {
        (auth.id_token.clone(), true)
    } else {
        (auth.access_token.clone(), false)
    };
    match token {
        Some(token) => Ok(ctx.with_server_token(ServerToken {
            server: server.to_owned(),
            token,
            id_token,
        })),
        None => Ok(ctx.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientOptions, Endpoint};
    use ag_domain::AuthTokens;

    struct FixedProvider {
        prefer_id: bool,
        known: bool,
    }

    #[async_trait::async_trait]
    impl ClientOptionsProvider for FixedProvider {
        async fn options(
            &self,
            _ctx: &ExecContext,
            server: &str,
        ) -> Result<Option<ClientOptions>> {
            if !self.known {
                return Ok(None);
            }
            let mut options = ClientOptions::new(
                server,
                Endpoint::Http {
                    url: "http://localhost:9000/mcp".into(),
                },
            );
            options.prefer_id_token = self.prefer_id;
            Ok(Some(options))
        }
    }

    fn ctx_with_tokens() -> ExecContext {
        ExecContext::new().with_auth(AuthTokens {
            id_token: Some("idt".into()),
            access_token: Some("acc".into()),
        })
    }

    #[tokio::test]
    async fn picks_id_token_when_preferred() {
        let provider = FixedProvider {
            prefer_id: true,
            known: true,
        };
        let derived = with_auth_token_context(&ctx_with_tokens(), &provider, "gh")
            .await
            .unwrap();
        let token = derived.server_token().unwrap();
        assert_eq!(token.token, "idt");
        assert!(token.id_token);
        assert_eq!(token.server, "gh");
    }

    #[tokio::test]
    async fn picks_access_token_by_default() {
        let provider = FixedProvider {
            prefer_id: false,
            known: true,
        };
        let derived = with_auth_token_context(&ctx_with_tokens(), &provider, "gh")
            .await
            .unwrap();
        assert_eq!(derived.server_token().unwrap().token, "acc");
    }

    #[tokio::test]
    async fn missing_token_returns_context_unchanged() {
        let provider = FixedProvider {
            prefer_id: true,
            known: true,
        };
        let ctx = ExecContext::new(); // no ambient tokens
        let derived = with_auth_token_context(&ctx, &provider, "gh").await.unwrap();
        assert!(derived.server_token().is_none());
    }

    #[tokio::test]
    async fn unknown_server_returns_context_unchanged() {
        let provider = FixedProvider {
            prefer_id: true,
            known: false,
        };
        let derived = with_auth_token_context(&ctx_with_tokens(), &provider, "gh")
            .await
            .unwrap();
        assert!(derived.server_token().is_none());
    }
}
