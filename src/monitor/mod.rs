//! Внешний производитель сообщений: периодический тик и оповещение о
//! загрузке CPU.
//!
//! Каждый тик публикует `tick` в очередь [`TICK_QUEUE`]. Когда средняя
//! загрузка за минуту поднимается выше порога, один раз публикуется
//! [`LOAD_ALERT_TEXT`] в очередь [`LOAD_QUEUE`]; следующее оповещение
//! возможно только после того, как загрузка опустится до порога.

use std::time::Duration;

use sysinfo::System;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::pubsub::QueueRegistry;

pub const TICK_QUEUE: &str = "tick";
pub const TICK_TEXT: &str = "tick";
pub const LOAD_QUEUE: &str = "load";
pub const LOAD_ALERT_TEXT: &str = "CPU load alert";

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub tick_interval: Duration,
    /// Порог средней загрузки, выше которого отправляется оповещение
    pub load_threshold: f64,
}

/// Пересечение порога.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadEdge {
    Rising,
    Falling,
}

/// Триггер с памятью: срабатывает только на смене состояния.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadTrigger {
    threshold: f64,
    tripped: bool,
}

/// Источник средней загрузки.
pub trait LoadProbe: Send + 'static {
    fn load_average(&mut self) -> f64;
}

/// Загрузка системы за одну минуту.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLoadProbe;

/// Монитор: тик, опрос загрузки и публикация.
#[derive(Debug)]
pub struct Monitor<P> {
    config: MonitorConfig,
    probe: P,
    trigger: LoadTrigger,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoadTrigger {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            tripped: false,
        }
    }

    /// Учитывает очередное значение загрузки.
    pub fn observe(
        &mut self,
        load: f64,
    ) -> Option<LoadEdge> {
        let above = load > self.threshold;
        match (self.tripped, above) {
            (false, true) => {
                self.tripped = true;
                Some(LoadEdge::Rising)
            }
            (true, false) => {
                self.tripped = false;
                Some(LoadEdge::Falling)
            }
            _ => None,
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }
}

impl<P: LoadProbe> Monitor<P> {
    pub fn new(
        config: MonitorConfig,
        probe: P,
    ) -> Self {
        let trigger = LoadTrigger::new(config.load_threshold);
        Self {
            config,
            probe,
            trigger,
        }
    }

    /// Один тик: публикация `tick` и проверка загрузки.
    pub fn step(
        &mut self,
        publisher: &QueueRegistry,
    ) -> Option<LoadEdge> {
        publisher.publish(TICK_QUEUE, TICK_TEXT);

        let load = self.probe.load_average();
        debug!(load, "Load average sampled");

        let edge = self.trigger.observe(load);
        match edge {
            Some(LoadEdge::Rising) => {
                info!(
                    load,
                    threshold = self.config.load_threshold,
                    "Load average has risen above threshold"
                );
                publisher.publish(LOAD_QUEUE, LOAD_ALERT_TEXT);
            }
            Some(LoadEdge::Falling) => {
                info!(
                    load,
                    threshold = self.config.load_threshold,
                    "Load average has fallen below threshold"
                );
            }
            None => {}
        }
        edge
    }

    /// Работает бесконечно, пока задачу не отменят.
    pub async fn run(
        mut self,
        publisher: QueueRegistry,
    ) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Первый тик интервала срабатывает сразу.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.step(&publisher);
        }
    }
}

impl LoadProbe for SystemLoadProbe {
    fn load_average(&mut self) -> f64 {
        System::load_average().one
    }
}

impl<F> LoadProbe for F
where
    F: FnMut() -> f64 + Send + 'static,
{
    fn load_average(&mut self) -> f64 {
        self()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
