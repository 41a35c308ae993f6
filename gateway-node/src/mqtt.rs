//! MQTT application task
//!
//! Runs on its own thread and follows the same command model as the I/O
//! links. Setup is `init` -> `create` -> broker connect -> subscriber; while
//! started the task blocks on its operations queue, which the client event
//! callback and the subscriber feed. Cleanup undoes only the setup steps that
//! completed.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use gateway_mcu::{ConnectInfo, MqttClient, MqttEvent, MqttEventCallback};
use log::*;

use crate::config::MqttConfig;
use crate::lock;
use crate::notification::{Command, Commands};
use crate::routes::Routes;
use crate::status::{CommonStatus, TaskContext};
use crate::subscriber::{DeviceSwitch, Subscriber, SubscriberMsg};

/// Work items for the operations loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttOp {
    /// The client lost the broker
    Disconnected,
    SubscribeFailed,
    PublishFailed,
    /// Leave the operations loop and clean up
    ExitLoop,
}

#[derive(Debug, thiserror::Error)]
pub enum MqttTaskError {
    #[error("mqtt client {step} failed: {reason}")]
    Client { step: &'static str, reason: String },
    #[error("exceeded {0} broker connect attempts")]
    RetriesExhausted(u32),
    #[error("connect aborted by operator")]
    Aborted(Commands),
    #[error("failed to spawn subscriber: {0}")]
    Spawn(#[from] std::io::Error),
}

fn client_err<E: std::fmt::Debug>(step: &'static str) -> impl FnOnce(E) -> MqttTaskError {
    move |e| MqttTaskError::Client {
        step,
        reason: format!("{e:?}"),
    }
}

/// What other tasks hold to control the MQTT task
pub struct MqttHandle {
    ctx: TaskContext,
    ops: SyncSender<MqttOp>,
}

impl MqttHandle {
    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    pub fn status(&self) -> CommonStatus {
        self.ctx.status()
    }

    /// Deliver a command, waking the operations loop if it must end
    pub fn notify(&self, command: Command) {
        let started = self.status() == CommonStatus::Started;
        match command {
            Command::Start if started => {
                info!("{}: already started", self.ctx.name());
                return;
            }
            Command::Stop | Command::Restart | Command::Shutdown if started => {
                if let Err(TrySendError::Full(_)) = self.ops.try_send(MqttOp::ExitLoop) {
                    warn!("{}: operations queue full, exit request dropped", self.ctx.name());
                }
            }
            _ => {}
        }
        self.ctx.notify(command);
    }
}

impl std::fmt::Debug for MqttHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttHandle").field("ctx", &self.ctx).finish()
    }
}

#[derive(Debug, Default)]
struct Progress {
    initialized: bool,
    created: bool,
    connected: bool,
}

struct SubscriberTask {
    tx: SyncSender<SubscriberMsg>,
    thread: JoinHandle<()>,
}

pub struct MqttTask<C: MqttClient + 'static> {
    client: Arc<Mutex<C>>,
    handle: Arc<MqttHandle>,
    ops_tx: SyncSender<MqttOp>,
    ops_rx: Receiver<MqttOp>,
    routes: Arc<Routes>,
    switch: Arc<DeviceSwitch>,
    config: MqttConfig,
    client_id: String,
    progress: Progress,
    subscriber: Option<SubscriberTask>,
    /// Restart seen while reconnecting; honored once the loop has exited
    deferred: Commands,
}

enum Next {
    Setup,
    Exit,
}

impl<C: MqttClient + 'static> MqttTask<C> {
    pub fn new(
        client: C,
        config: MqttConfig,
        routes: Arc<Routes>,
        switch: Arc<DeviceSwitch>,
    ) -> (Self, Arc<MqttHandle>) {
        let (ops_tx, ops_rx) = mpsc::sync_channel(config.queue_depth);
        let handle = Arc::new(MqttHandle {
            ctx: TaskContext::new("MQTT"),
            ops: ops_tx.clone(),
        });
        let client_id = if config.unique_client_id {
            format!("{}{:04x}", config.client_id_prefix, rand::random::<u16>())
        } else {
            config.client_id_prefix.clone()
        };
        let task = Self {
            client: Arc::new(Mutex::new(client)),
            handle: handle.clone(),
            ops_tx,
            ops_rx,
            routes,
            switch,
            config,
            client_id,
            progress: Progress::default(),
            subscriber: None,
            deferred: Commands::empty(),
        };
        (task, handle)
    }

    /// Task body; returns after Shutdown
    pub fn run(mut self) {
        info!("MQTT: task started, client id {}", self.client_id);
        loop {
            self.set_status(CommonStatus::Starting);
            let pending = match self.setup() {
                Ok(()) => {
                    self.set_status(CommonStatus::Started);
                    let result = self.operations_loop();
                    self.set_status(CommonStatus::Stopping);
                    self.cleanup();
                    match result {
                        Ok(()) => {
                            self.set_status(CommonStatus::Stopped);
                            Commands::empty()
                        }
                        Err(e) => self.failed(e),
                    }
                }
                Err(e) => {
                    self.cleanup();
                    self.failed(e)
                }
            };

            let pending = match std::mem::take(&mut self.deferred).dominant() {
                Some(command) if pending.is_empty() => Commands::from(command),
                _ => pending,
            };
            match self.wait_for_command(pending) {
                Next::Setup => continue,
                Next::Exit => break,
            }
        }
        self.cleanup();
        self.set_status(CommonStatus::Stopped);
        info!("MQTT: task exiting");
    }

    fn set_status(&self, status: CommonStatus) {
        self.handle.ctx.set_status(status);
    }

    fn failed(&self, error: MqttTaskError) -> Commands {
        let pending = match error {
            MqttTaskError::Aborted(rest) => {
                info!("MQTT: connect aborted by operator");
                rest
            }
            other => {
                error!("MQTT: {other}");
                Commands::empty()
            }
        };
        self.set_status(CommonStatus::FailedToStart);
        pending
    }

    fn setup(&mut self) -> Result<(), MqttTaskError> {
        while self.ops_rx.try_recv().is_ok() {}
        self.deferred = Commands::empty();

        if !self.progress.initialized {
            lock(&self.client).init().map_err(client_err("init"))?;
            self.progress.initialized = true;
        }

        if !self.progress.created {
            let (subscriber_tx, subscriber_rx) = mpsc::sync_channel(self.config.queue_depth);
            let callback = self.event_callback(subscriber_tx.clone());
            let broker = self.config.broker_info();
            let tls = self.config.tls();
            lock(&self.client)
                .create(&broker, tls.as_ref(), callback)
                .map_err(client_err("create"))?;
            self.progress.created = true;
            self.start_subscriber(subscriber_tx, subscriber_rx)?;
        }

        self.connect_broker()?;
        self.send_to_subscriber(SubscriberMsg::Subscribe);
        Ok(())
    }

    /// Runs in client-library context: classify and enqueue only
    fn event_callback(&self, subscriber: SyncSender<SubscriberMsg>) -> MqttEventCallback {
        let ops = self.ops_tx.clone();
        Box::new(move |event| match event {
            MqttEvent::Disconnected { reason } => {
                warn!("MQTT: broker disconnected: {reason}");
                if ops.try_send(MqttOp::Disconnected).is_err() {
                    error!("MQTT: operations queue full, disconnect dropped");
                }
            }
            MqttEvent::Message(publish) => {
                debug!("MQTT: message on '{}' ({} bytes)", publish.topic, publish.payload.len());
                if subscriber.try_send(SubscriberMsg::Message(publish)).is_err() {
                    warn!("MQTT: subscriber queue full, message dropped");
                }
            }
        })
    }

    fn start_subscriber(
        &mut self,
        tx: SyncSender<SubscriberMsg>,
        rx: Receiver<SubscriberMsg>,
    ) -> Result<(), MqttTaskError> {
        let subscriber = Subscriber::new(
            self.client.clone(),
            self.config.clone(),
            self.switch.clone(),
            self.ops_tx.clone(),
        );
        let thread = thread::Builder::new()
            .name("mqtt-subscriber".into())
            .spawn(move || subscriber.run(rx))?;
        self.subscriber = Some(SubscriberTask { tx, thread });
        Ok(())
    }

    fn send_to_subscriber(&self, msg: SubscriberMsg) {
        if let Some(subscriber) = &self.subscriber {
            // Blocks only while the subscriber drains a full queue
            if let Err(e) = subscriber.tx.send(msg) {
                warn!("MQTT: subscriber is gone, {:?} not delivered", e.0);
            }
        }
    }

    fn connect_info(&self) -> ConnectInfo {
        ConnectInfo {
            client_id: self.client_id.clone(),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            keep_alive_secs: self.config.keep_alive_secs,
            clean_session: true,
            timeout: Duration::from_millis(self.config.timeout_ms),
        }
    }

    fn connect_broker(&mut self) -> Result<(), MqttTaskError> {
        let policy = self.config.retry_policy();
        let info = self.connect_info();
        let max = policy.max_retries;

        for attempt in 1..=max {
            if attempt > 1 {
                let commands = self.handle.ctx.wait(Some(policy.retry_interval));
                if commands.contains(Command::Stop) || commands.contains(Command::Shutdown) {
                    self.deferred = Commands::empty();
                    return Err(MqttTaskError::Aborted(
                        commands.without(Command::Stop).without(Command::Start),
                    ));
                }
                // While Started a Restart has already queued ExitLoop; keep it for after cleanup
                if commands.contains(Command::Restart) && self.handle.status() == CommonStatus::Started {
                    info!("MQTT: restart requested during reconnect");
                    self.deferred = self.deferred.with(Command::Restart);
                }
            }

            if !self.routes.default_ready() {
                warn!(
                    "MQTT: default I/O {} not ready, attempt {attempt}/{max} skipped",
                    self.routes.default_io()
                );
                continue;
            }

            info!(
                "MQTT: connecting to {}:{} (attempt {attempt}/{max})",
                self.config.broker, self.config.port
            );
            match lock(&self.client).connect(&info) {
                Ok(()) => {
                    info!("MQTT: connected as {}", info.client_id);
                    self.progress.connected = true;
                    return Ok(());
                }
                Err(e) => warn!("MQTT: connect attempt {attempt} failed: {e:?}"),
            }
        }
        Err(MqttTaskError::RetriesExhausted(max))
    }

    fn operations_loop(&mut self) -> Result<(), MqttTaskError> {
        loop {
            let Ok(op) = self.ops_rx.recv() else {
                return Ok(());
            };
            match op {
                MqttOp::Disconnected => {
                    if self.progress.connected {
                        if let Err(e) = lock(&self.client).disconnect() {
                            debug!("MQTT: disconnect after broker loss: {e:?}");
                        }
                        self.progress.connected = false;
                    }
                    self.connect_broker()?;
                    self.send_to_subscriber(SubscriberMsg::Subscribe);
                }
                MqttOp::SubscribeFailed => error!("MQTT: subscribe failed, staying connected"),
                MqttOp::PublishFailed => error!("MQTT: publish failed"),
                MqttOp::ExitLoop => return Ok(()),
            }
        }
    }

    fn cleanup(&mut self) {
        if let Some(subscriber) = self.subscriber.take() {
            if let Err(e) = subscriber.tx.send(SubscriberMsg::Stop) {
                warn!("MQTT: subscriber gone before stop: {e}");
            }
            if subscriber.thread.join().is_err() {
                error!("MQTT: subscriber panicked");
            }
        }

        let mut client = lock(&self.client);
        if self.progress.connected {
            if let Err(e) = client.disconnect() {
                error!("MQTT: disconnect failed: {e:?}");
            }
            self.progress.connected = false;
        }
        if self.progress.created {
            if let Err(e) = client.delete() {
                error!("MQTT: delete failed: {e:?}");
            }
            self.progress.created = false;
        }
        if self.progress.initialized {
            if let Err(e) = client.deinit() {
                error!("MQTT: deinit failed: {e:?}");
            }
            self.progress.initialized = false;
        }
    }

    fn wait_for_command(&self, mut pending: Commands) -> Next {
        loop {
            let commands = if pending.is_empty() {
                self.handle.ctx.wait(None)
            } else {
                std::mem::take(&mut pending)
            };
            match commands.dominant() {
                Some(Command::Shutdown) => return Next::Exit,
                Some(Command::Start) | Some(Command::Restart) => return Next::Setup,
                Some(Command::Stop) => debug!("MQTT: already stopped"),
                None => {}
            }
        }
    }
}
