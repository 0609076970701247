//! SFTP Service (C9): a standalone SSH server offering password auth and a
//! sandboxed SFTP subsystem, one session per accepted channel.

pub mod auth;
pub mod handlers;
pub mod hostkey;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use russh::keys::PrivateKey;
use russh::server::{Auth, Handler as ServerHandler, Msg, Server as ServerTrait, Session};
use russh::{Channel, ChannelId};

use crate::remote::RemoteClient;
use crate::sandbox::path::PathResolver;
use crate::sandbox::registry::ServerRegistry;
use crate::sftp::handlers::SftpHandler;

pub struct SftpServer {
    registry: Arc<ServerRegistry>,
    remote: Arc<RemoteClient>,
    host_key: PrivateKey,
}

impl SftpServer {
    pub fn new(registry: Arc<ServerRegistry>, remote: Arc<RemoteClient>, host_key_path: &std::path::Path) -> Result<Self> {
        let host_key = hostkey::load_or_generate(host_key_path).context("loading SFTP host key")?;
        Ok(Self { registry, remote, host_key })
    }

    pub async fn serve(self, addr: &str) -> Result<()> {
        let config = Arc::new(russh::server::Config {
            keys: vec![self.host_key.clone()],
            auth_rejection_time: std::time::Duration::from_secs(1),
            ..Default::default()
        });

        let mut handler_factory = self;
        russh::server::Server::run_on_address(&mut handler_factory, config, addr)
            .await
            .context("SFTP server stopped")
    }
}

impl ServerTrait for SftpServer {
    type Handler = SessionHandler;

    fn new_client(&mut self, _peer_addr: Option<std::net::SocketAddr>) -> SessionHandler {
        SessionHandler {
            registry: self.registry.clone(),
            remote: self.remote.clone(),
            server_id: None,
        }
    }
}

pub struct SessionHandler {
    registry: Arc<ServerRegistry>,
    remote: Arc<RemoteClient>,
    server_id: Option<String>,
}

#[async_trait]
impl ServerHandler for SessionHandler {
    type Error = anyhow::Error;

    /// `none` is rejected but `password` is advertised, per spec.
    async fn auth_none(&mut self, _user: &str) -> Result<Auth, Self::Error> {
        Ok(Auth::Reject { proceed_with_methods: None })
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let Some((user_name, id_fragment)) = auth::split_username(user) else {
            return Ok(Auth::Reject { proceed_with_methods: None });
        };

        let Some(server_id) = auth::resolve_server_id(&self.registry, id_fragment) else {
            return Ok(Auth::Reject { proceed_with_methods: None });
        };

        if self.remote.verify_sftp(user_name, password, &server_id).await {
            self.server_id = Some(server_id);
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject { proceed_with_methods: None })
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if name != "sftp" {
            session.channel_failure(channel_id)?;
            return Ok(());
        }

        let server_id = self.server_id.clone().context("subsystem requested before authentication")?;
        let instance = self.registry.get(&server_id).context("server vanished after authentication")?;
        let resolver = PathResolver::new(instance.sandbox_root())?;

        let channel = session.channel(channel_id).context("channel not found")?;
        let handler = SftpHandler::new(resolver);
        session.channel_success(channel_id)?;
        russh_sftp::server::run(channel.into_stream(), handler).await;
        Ok(())
    }
}
