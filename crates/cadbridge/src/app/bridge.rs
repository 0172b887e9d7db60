//! Orchestration of one connection and its scene handler
//!
//! [`Bridge`] owns the [`Connection`], the [`EventQueue`] its I/O thread posts to, and the
//! [`SceneHandler`] that applies those events. Everything here runs on the host's main thread;
//! [`Bridge::tick`] is the only place scene mutation happens.

use crate::handler::SceneHandler;
use crate::host::{HostScene, RemoteTag};
use crate::refacet::build_requests;
use crate::settings::Settings;
use cadbridge_network::{event_queue, Connection, ConnectionState, EventQueue, Result};
use tracing::{debug, info, warn};

pub struct Bridge<H: HostScene> {
    connection: Connection,
    events: EventQueue,
    handler: SceneHandler<H>,
    settings: Settings,
}

impl<H: HostScene> Bridge<H> {
    pub fn new(scene: H, settings: Settings) -> Self {
        let (sender, events) = event_queue();
        Self {
            connection: Connection::new(settings.connection_config(), sender),
            events,
            handler: SceneHandler::new(scene, settings.scene_config()),
            settings,
        }
    }

    /// Start connecting to the configured server
    pub fn connect(&mut self) -> Result<()> {
        let address = self.settings.server.address.clone();
        self.connect_to(&address)
    }

    pub fn connect_to(&mut self, address: &str) -> Result<()> {
        info!("Connecting to {}", address);
        self.connection.connect(address)
    }

    /// Close the connection and deliver the resulting disconnect
    ///
    /// Also the way to finish a session that ended on its own: the I/O thread is joined before
    /// the queue is drained, so `on_disconnect` always runs.
    pub fn disconnect(&mut self) {
        self.connection.disconnect();
        self.tick();
    }

    /// Apply every queued event to the scene
    pub fn tick(&mut self) -> usize {
        let processed = self.events.drain(&mut self.handler);
        if processed > 0 {
            debug!("Processed {} events", processed);
        }
        processed
    }

    /// Request a full listing, of visible objects only when configured so
    pub fn refresh(&mut self) -> Result<Option<u32>> {
        let request_id = if self.settings.scene.list_only_visible {
            self.connection.list_visible()?
        } else {
            self.connection.list_all()?
        };
        if request_id.is_some() {
            self.handler.mark_busy();
        }
        Ok(request_id)
    }

    pub fn subscribe_all(&mut self) -> Result<Option<u32>> {
        self.connection.subscribe_all()
    }

    pub fn unsubscribe_all(&mut self) -> Result<Option<u32>> {
        self.connection.unsubscribe_all()
    }

    /// Refacet the selected mirrored objects, one request per file
    pub fn refacet_selected(&mut self) -> Result<Vec<u32>> {
        if self.handler.is_busy() {
            warn!("A request is still in flight, refacet skipped");
            return Ok(Vec::new());
        }

        let scene = self.handler.scene();
        let tags: Vec<RemoteTag> = scene
            .selection()
            .selected
            .iter()
            .filter_map(|object| scene.object_tag(*object))
            .collect();
        if tags.is_empty() {
            debug!("No mirrored objects selected");
            return Ok(Vec::new());
        }

        let mut request_ids = Vec::new();
        for request in build_requests(&tags, self.settings.facet.to_params()) {
            if let Some(request_id) = self.connection.send_request(request)? {
                request_ids.push(request_id);
            }
        }
        if !request_ids.is_empty() {
            self.handler.mark_busy();
        }
        Ok(request_ids)
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn handler(&self) -> &SceneHandler<H> {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut SceneHandler<H> {
        &mut self.handler
    }

    pub fn scene(&self) -> &H {
        self.handler.scene()
    }

    pub fn scene_mut(&mut self) -> &mut H {
        self.handler.scene_mut()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}
