//! In-memory resource clients for watcher tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio::sync::mpsc;

use warpcron_core::{
    ClientError, ClientResult, Snapshot, Template, TemplateClient, TemplateSpec, WatchError,
    WatchEvent, WatchStream, Workflow, WorkflowClient,
};

type Round<R> = Vec<Result<WatchEvent<R>, WatchError>>;

/// Each `watch` call replays the next scripted round, then the stream
/// ends. With no rounds left the stream stays open forever.
struct Script<R> {
    rounds: Mutex<VecDeque<Round<R>>>,
    subscriptions: Mutex<Vec<bool>>,
    fail_next: AtomicBool,
}

impl<R> Default for Script<R> {
    fn default() -> Self {
        Self {
            rounds: Mutex::new(VecDeque::new()),
            subscriptions: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        }
    }
}

impl<R: Send + 'static> Script<R> {
    fn open(&self, include_initial: bool) -> ClientResult<WatchStream<R>> {
        self.subscriptions.lock().unwrap().push(include_initial);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ClientError::Unavailable("scripted failure".to_string()));
        }
        match self.rounds.lock().unwrap().pop_front() {
            Some(round) => Ok(stream::iter(round).boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}

#[derive(Default)]
pub struct FakeWorkflows {
    script: Script<Workflow>,
    listed: Mutex<Vec<Workflow>>,
    fail_list: AtomicBool,
}

impl FakeWorkflows {
    pub fn push_round(&self, round: Round<Workflow>) {
        self.script.rounds.lock().unwrap().push_back(round);
    }

    pub fn fail_next_subscribe(&self) {
        self.script.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn subscriptions(&self) -> Vec<bool> {
        self.script.subscriptions.lock().unwrap().clone()
    }

    pub fn set_listed(&self, workflows: Vec<Workflow>) {
        *self.listed.lock().unwrap() = workflows;
    }

    pub fn fail_list_once(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkflowClient for FakeWorkflows {
    async fn watch(&self, _: &str, include_initial: bool) -> ClientResult<WatchStream<Workflow>> {
        self.script.open(include_initial)
    }

    async fn list(&self, _: &str) -> ClientResult<Vec<Workflow>> {
        if self.fail_list.swap(false, Ordering::SeqCst) {
            return Err(ClientError::Request("list failed".to_string()));
        }
        Ok(self.listed.lock().unwrap().clone())
    }

    async fn get(&self, _: &str, name: &str) -> ClientResult<Option<Workflow>> {
        Ok(self.listed.lock().unwrap().iter().find(|w| w.name == name).cloned())
    }
}

#[derive(Default)]
pub struct FakeTemplates {
    script: Script<Template>,
    stored: Mutex<HashMap<String, Template>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeTemplates {
    pub fn insert(&self, name: &str, spec: TemplateSpec) {
        self.stored
            .lock()
            .unwrap()
            .insert(name.to_string(), Template::new(name, spec));
    }

    /// Store a template whose payload has no spec.
    pub fn insert_partial(&self, name: &str) {
        self.stored.lock().unwrap().insert(
            name.to_string(),
            Template {
                name: name.to_string(),
                spec: None,
            },
        );
    }

    pub fn fail(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn push_round(&self, round: Round<Template>) {
        self.script.rounds.lock().unwrap().push_back(round);
    }
}

#[async_trait]
impl TemplateClient for FakeTemplates {
    async fn watch(&self, _: &str, include_initial: bool) -> ClientResult<WatchStream<Template>> {
        self.script.open(include_initial)
    }

    async fn get(&self, _: &str, internal_name: &str) -> ClientResult<Option<Template>> {
        if self.failing.lock().unwrap().contains(internal_name) {
            return Err(ClientError::Unavailable(format!("cannot fetch {internal_name}")));
        }
        Ok(self.stored.lock().unwrap().get(internal_name).cloned())
    }
}

/// Receive one snapshot or fail the test after a second.
pub async fn recv(rx: &mut mpsc::Receiver<Snapshot>) -> Snapshot {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for snapshot")
        .expect("snapshot channel closed")
}
