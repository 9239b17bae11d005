//! Recording services shared by the host crate's unit tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use threadhost_core::{
    InterfaceTag, ProcessResult, ServiceControl, ServiceCreateInfo, ServiceError, ServiceFactory,
    ServiceInstanceInfo, StartServiceRecord,
};

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

pub trait Calculator: Send + Sync {
    fn name(&self) -> &str;
    fn add(&self, a: i64, b: i64) -> i64;
    /// Thread the service was created on.
    fn thread(&self) -> ThreadId;
}

pub trait Auditor: Send + Sync {
    fn audited(&self) -> u32;
}

#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    pub fail_create: bool,
    pub fail_init: bool,
    pub fail_shutdown: bool,
    /// Return `Quit` from the n-th `process()` call onwards.
    pub quit_after: Option<u32>,
    pub sleep_limit: Option<Duration>,
    /// Resolve a `Calculator` during init and log which one was found.
    pub resolve_on_init: bool,
}

pub struct RecordingService {
    name: String,
    log: Log,
    behaviour: Behaviour,
    process_calls: AtomicU32,
    owner: ThreadId,
}

#[async_trait]
impl ServiceControl for RecordingService {
    async fn init(&self, info: &ServiceCreateInfo) -> anyhow::Result<()> {
        self.log.lock().push(format!("init:{}", self.name));
        if self.behaviour.resolve_on_init {
            let outcome = match info.provider().get::<dyn Calculator>() {
                Ok(calc) => calc.name().to_string(),
                Err(err) => format!("error({err})"),
            };
            self.log
                .lock()
                .push(format!("resolved:{}:{outcome}", self.name));
        }
        if self.behaviour.fail_init {
            anyhow::bail!("{} refused to initialize", self.name);
        }
        Ok(())
    }

    fn process(&self) -> ProcessResult {
        let calls = self.process_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.behaviour.quit_after.is_some_and(|n| calls >= n) {
            return ProcessResult::Quit;
        }
        self.behaviour
            .sleep_limit
            .map_or(ProcessResult::NoSleepLimit, ProcessResult::SleepLimit)
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.log.lock().push(format!("shutdown:{}", self.name));
        if self.behaviour.fail_shutdown {
            anyhow::bail!("{} failed to shut down", self.name);
        }
        Ok(())
    }
}

impl Calculator for RecordingService {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&self, a: i64, b: i64) -> i64 {
        a + b
    }

    fn thread(&self) -> ThreadId {
        self.owner
    }
}

impl Auditor for RecordingService {
    fn audited(&self) -> u32 {
        self.process_calls.load(Ordering::SeqCst)
    }
}

pub struct RecordingFactory {
    name: String,
    log: Log,
    behaviour: Behaviour,
    tags: Vec<InterfaceTag>,
}

impl RecordingFactory {
    pub fn new(name: &str, log: &Log) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::clone(log),
            behaviour: Behaviour::default(),
            tags: vec![InterfaceTag::of::<dyn Calculator>()],
        }
    }

    pub fn behaving(mut self, behaviour: Behaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn with_tags(mut self, tags: Vec<InterfaceTag>) -> Self {
        self.tags = tags;
        self
    }

    pub fn boxed(self) -> Box<dyn ServiceFactory> {
        Box::new(self)
    }

    pub fn record(self) -> StartServiceRecord {
        let name = self.name.clone();
        StartServiceRecord::new(name, self.boxed())
    }
}

impl ServiceFactory for RecordingFactory {
    fn supported_interfaces(&self) -> Vec<InterfaceTag> {
        self.tags.clone()
    }

    fn create(
        self: Box<Self>,
        requested: InterfaceTag,
        _info: &ServiceCreateInfo,
    ) -> Result<ServiceInstanceInfo, ServiceError> {
        let this = *self;
        if !this.tags.contains(&requested) {
            return Err(ServiceError::UnsupportedType { requested });
        }
        if this.behaviour.fail_create {
            return Err(anyhow::anyhow!("{} could not be built", this.name).into());
        }
        this.log.lock().push(format!("create:{}", this.name));

        let service = Arc::new(RecordingService {
            name: this.name,
            log: this.log,
            behaviour: this.behaviour,
            process_calls: AtomicU32::new(0),
            owner: std::thread::current().id(),
        });
        let mut info = ServiceInstanceInfo::for_service(&service);
        if this.tags.contains(&InterfaceTag::of::<dyn Calculator>()) {
            let calculator: Arc<dyn Calculator> = service.clone();
            info = info.with_interface(calculator);
        }
        if this.tags.contains(&InterfaceTag::of::<dyn Auditor>()) {
            let auditor: Arc<dyn Auditor> = service.clone();
            info = info.with_interface(auditor);
        }
        Ok(info)
    }
}

/// A well-behaved `Calculator` service named `name`.
pub fn record(name: &str, log: &Log) -> StartServiceRecord {
    RecordingFactory::new(name, log).record()
}

pub fn failing_record(name: &str, log: &Log, behaviour: Behaviour) -> StartServiceRecord {
    RecordingFactory::new(name, log).behaving(behaviour).record()
}
