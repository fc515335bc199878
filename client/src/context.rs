//! Access Context
//!
//! Wires the resolvers to one session and hands out the gate and route table.

use std::sync::Arc;

use tracing::info;

use crate::backend::QueryService;
use crate::config::ResolverConfig;
use crate::gate::AccessGate;
use crate::lifecycle::Lifecycle;
use crate::resolvers::{BlockStatusHandle, BlockStatusResolver, RoleHandle, RoleResolver};
use crate::routes::RouteTable;
use crate::session::SessionHandle;

/// Running resolvers for one session plus the routing view over them.
pub struct AccessContext {
    lifecycle: Lifecycle,
    role: RoleResolver,
    block: BlockStatusResolver,
    gate: AccessGate,
    routes: RouteTable,
}

impl AccessContext {
    /// Start both resolvers against `session`.
    pub fn start(
        session: &SessionHandle,
        queries: Arc<dyn QueryService>,
        config: &ResolverConfig,
        routes: RouteTable,
    ) -> Self {
        let lifecycle = Lifecycle::new();
        let role = RoleResolver::spawn(session, Arc::clone(&queries), config);
        let block =
            BlockStatusResolver::spawn(session, queries, config, Some(lifecycle.subscribe()));
        let gate = AccessGate::new(session.clone(), role.handle(), block.handle());

        info!(
            poll_ms = config.block_poll_interval.as_millis(),
            stale_ms = config.block_stale_after.as_millis(),
            "Access resolvers started"
        );

        Self {
            lifecycle,
            role,
            block,
            gate,
            routes,
        }
    }

    pub const fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub const fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn role(&self) -> RoleHandle {
        self.role.handle()
    }

    pub fn block_status(&self) -> BlockStatusHandle {
        self.block.handle()
    }

    /// Lifecycle hub; hosts report focus changes through it.
    pub const fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Shorthand for reporting that the application regained focus.
    pub fn focus_gained(&self) {
        self.lifecycle.focus_gained();
    }

    /// Re-check block status now.
    pub fn force_block_refresh(&self) {
        self.block.handle().force_refresh();
    }

    /// Stop both resolvers.
    pub async fn shutdown(self) {
        futures::future::join(self.role.shutdown(), self.block.shutdown()).await;
        info!("Access resolvers stopped");
    }
}
