//! MQTT subscriber: topic subscription and the device output it drives

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use gateway_mcu::{DeviceOutput, MqttClient, Publish, Subscription};
use log::*;

use crate::config::MqttConfig;
use crate::lock;
use crate::mqtt::MqttOp;

/// The output the broker switches on and off
pub struct DeviceSwitch {
    on: AtomicBool,
    output: Mutex<Box<dyn DeviceOutput>>,
}

impl DeviceSwitch {
    pub fn new(output: Box<dyn DeviceOutput>) -> Self {
        Self {
            on: AtomicBool::new(false),
            output: Mutex::new(output),
        }
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }

    /// Drive the output; returns false if it was already in that state
    pub fn set(&self, on: bool) -> bool {
        let mut output = lock(&self.output);
        if self.on.swap(on, Ordering::Relaxed) == on {
            return false;
        }
        output.set(on);
        true
    }
}

impl std::fmt::Debug for DeviceSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSwitch").field("on", &self.is_on()).finish()
    }
}

#[derive(Debug)]
pub enum SubscriberMsg {
    Subscribe,
    Unsubscribe,
    Message(Publish),
    Stop,
}

pub(crate) struct Subscriber<C: MqttClient> {
    client: Arc<Mutex<C>>,
    config: MqttConfig,
    switch: Arc<DeviceSwitch>,
    ops: SyncSender<MqttOp>,
    subscribed: bool,
}

impl<C: MqttClient> Subscriber<C> {
    pub(crate) fn new(
        client: Arc<Mutex<C>>,
        config: MqttConfig,
        switch: Arc<DeviceSwitch>,
        ops: SyncSender<MqttOp>,
    ) -> Self {
        Self {
            client,
            config,
            switch,
            ops,
            subscribed: false,
        }
    }

    pub(crate) fn run(mut self, rx: Receiver<SubscriberMsg>) {
        debug!("subscriber started");
        for msg in rx.iter() {
            match msg {
                SubscriberMsg::Subscribe => self.subscribe(),
                SubscriberMsg::Unsubscribe => self.unsubscribe(),
                SubscriberMsg::Message(publish) => self.on_message(&publish),
                SubscriberMsg::Stop => break,
            }
        }
        if self.subscribed {
            self.unsubscribe();
        }
        debug!("subscriber exiting");
    }

    fn subscription(&self) -> Subscription {
        Subscription {
            topic: self.config.topic.clone(),
            qos: self.config.qos,
        }
    }

    fn subscribe(&mut self) {
        let subscription = self.subscription();
        let interval = Duration::from_millis(self.config.subscribe_interval_ms);
        for attempt in 1..=self.config.subscribe_retries {
            if attempt > 1 {
                thread::sleep(interval);
            }
            match lock(&self.client).subscribe(std::slice::from_ref(&subscription)) {
                Ok(()) => {
                    info!("subscribed to '{}' ({:?})", subscription.topic, subscription.qos);
                    self.subscribed = true;
                    return;
                }
                Err(e) => warn!("subscribe to '{}' failed (attempt {attempt}): {e:?}", subscription.topic),
            }
        }

        error!("giving up on subscribing to '{}'", subscription.topic);
        match self.ops.try_send(MqttOp::SubscribeFailed) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => error!("mqtt operations queue full, subscribe failure dropped"),
            Err(TrySendError::Disconnected(_)) => debug!("mqtt task gone"),
        }
    }

    fn unsubscribe(&mut self) {
        let subscription = self.subscription();
        match lock(&self.client).unsubscribe(std::slice::from_ref(&subscription)) {
            Ok(()) => info!("unsubscribed from '{}'", subscription.topic),
            Err(e) => warn!("unsubscribe from '{}' failed: {e:?}", subscription.topic),
        }
        self.subscribed = false;
    }

    fn on_message(&self, publish: &Publish) {
        let payload = publish.payload.as_slice();
        let on = if payload == self.config.on_message.as_bytes() {
            true
        } else if payload == self.config.off_message.as_bytes() {
            false
        } else {
            warn!(
                "ignoring message on '{}': {}",
                publish.topic,
                String::from_utf8_lossy(payload)
            );
            return;
        };

        if self.switch.set(on) {
            info!("device turned {}", if on { "ON" } else { "OFF" });
        } else {
            info!("device already {}", if on { "ON" } else { "OFF" });
        }
    }
}
