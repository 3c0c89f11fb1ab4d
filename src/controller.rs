//! Action surface and event loop around the reconciliation engine.
//!
//! One task owns all mutable state. UI commands, the poll interval, the
//! settle timer, HTTP results and push events all arrive on its mailbox and
//! are handled one at a time; nothing else writes the view.

use crate::config::{Config, TrackingConfig};
use crate::engine::{Phase, PollOutcome, PollTicket, Reconciler};
use crate::error::{ActionError, RemoteError, ValidationError};
use crate::log_lines::LogEntry;
use crate::remote::{
    ActionKind, AppsBody, DeleteBody, DeployBody, OperationRequest, PlatformRecord,
    PushChannel, PushMessage, RemoteService, StartResponse, StatusResponse,
};
use crate::steps::{canonical_order, Step};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Read-only projection handed to the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerView {
    pub phase: Phase,
    pub running: bool,
    pub idle: bool,
    pub progress: u8,
    pub steps: Vec<Step>,
    pub status: String,
    pub logs: Vec<LogEntry>,
    pub logs_url: Option<String>,
    pub operation_id: Option<String>,
    pub platform: Option<PlatformRecord>,
    pub platforms: Vec<PlatformRecord>,
    pub namespace: Option<String>,
    pub push_connected: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeployInput {
    pub apps: Vec<String>,
    pub namespace: Option<String>,
    pub branch: Option<String>,
    pub user_email: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AppsInput {
    pub apps: Vec<String>,
    pub namespace: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteInput {
    pub namespace: Option<String>,
    pub branch: Option<String>,
    pub confirm: bool,
}

#[derive(Debug, Clone)]
enum Action {
    Deploy(DeployInput),
    Add(AppsInput),
    Remove(AppsInput),
    Delete(DeleteInput),
}

enum Command {
    Start {
        action: Action,
        reply: oneshot::Sender<Result<(), ActionError>>,
    },
    LoadPlatform {
        namespace: Option<String>,
        reply: oneshot::Sender<bool>,
    },
    LoadAllPlatforms,
}

enum Event {
    StartFinished {
        generation: u64,
        kind: ActionKind,
        result: Result<StartResponse, RemoteError>,
    },
    PollTick {
        generation: u64,
    },
    PollFinished {
        ticket: PollTicket,
        result: Result<StatusResponse, RemoteError>,
    },
    Push {
        generation: u64,
        message: PushMessage,
    },
    Settled {
        generation: u64,
    },
    PlatformLoaded {
        result: Result<PlatformRecord, RemoteError>,
    },
    PlatformsLoaded {
        result: Result<Vec<PlatformRecord>, RemoteError>,
    },
}

/// Settings the controller needs from configuration.
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub tracking: TrackingConfig,
    pub branch: String,
    pub user_email: Option<String>,
    pub namespace: Option<String>,
}

impl TrackerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tracking: config.tracking,
            branch: config.platform.branch.clone(),
            user_email: config.platform.user_email.clone(),
            namespace: config.platform.default_namespace.clone(),
        }
    }
}

/// Timer and subscription handles; every terminal transition releases them.
#[derive(Default)]
struct Timers {
    poll: Option<JoinHandle<()>>,
    settle: Option<JoinHandle<()>>,
    push: Option<JoinHandle<()>>,
}

impl Timers {
    fn stop_polling(&mut self) {
        if let Some(task) = self.poll.take() {
            task.abort();
        }
    }

    fn stop_settle(&mut self) {
        if let Some(task) = self.settle.take() {
            task.abort();
        }
    }

    /// Aborting the forwarder drops the subscription, which unsubscribes.
    fn unsubscribe(&mut self) {
        if let Some(task) = self.push.take() {
            task.abort();
        }
    }

    fn cancel_all(&mut self) {
        self.stop_polling();
        self.stop_settle();
        self.unsubscribe();
    }
}

pub struct Controller {
    remote: Arc<dyn RemoteService>,
    push: Option<Arc<dyn PushChannel>>,
    options: TrackerOptions,
    engine: Reconciler,
    timers: Timers,
    namespace: Option<String>,
    platform: Option<PlatformRecord>,
    platforms: Vec<PlatformRecord>,
    platform_loading: bool,
    last_platform_load: Option<Instant>,
    push_connected: bool,
    events_tx: mpsc::UnboundedSender<Event>,
    view_tx: watch::Sender<TrackerView>,
}

impl Controller {
    /// Start the controller task and return the handle the UI talks to.
    pub fn spawn(
        remote: Arc<dyn RemoteService>,
        push: Option<Arc<dyn PushChannel>>,
        options: TrackerOptions,
    ) -> TrackerHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let namespace = options.namespace.clone();
        let controller = Self {
            remote,
            push,
            options,
            engine: Reconciler::new(),
            timers: Timers::default(),
            namespace,
            platform: None,
            platforms: Vec::new(),
            platform_loading: false,
            last_platform_load: None,
            push_connected: false,
            events_tx,
            view_tx: watch::channel(initial_view()).0,
        };
        let view = controller.view();
        controller.view_tx.send_replace(view);
        let view_rx = controller.view_tx.subscribe();

        tokio::spawn(controller.run(commands_rx, events_rx));

        TrackerHandle {
            commands: commands_tx,
            view: view_rx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
            self.publish();
        }
        self.timers.cancel_all();
        debug!("Tracker stopped");
    }

    fn is_idle(&self) -> bool {
        self.engine.phase() == Phase::Idle && !self.platform_loading
    }

    fn view(&self) -> TrackerView {
        let snapshot = self.engine.snapshot();
        TrackerView {
            phase: self.engine.phase(),
            running: self.engine.is_running(),
            idle: self.is_idle(),
            progress: snapshot.progress_percent,
            steps: snapshot.steps,
            status: self.engine.status().to_string(),
            logs: self.engine.logs().to_vec(),
            logs_url: snapshot.logs_url,
            operation_id: snapshot.operation_id,
            platform: self.platform.clone(),
            platforms: self.platforms.clone(),
            namespace: self.namespace.clone(),
            push_connected: self.push_connected,
        }
    }

    fn publish(&self) {
        let view = self.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { action, reply } => {
                let result = self.start(action);
                self.publish();
                let _ = reply.send(result);
            }
            Command::LoadPlatform { namespace, reply } => {
                let issued = self.request_platform(namespace, false);
                self.publish();
                let _ = reply.send(issued);
            }
            Command::LoadAllPlatforms => self.request_platforms(),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::StartFinished {
                generation,
                kind,
                result,
            } => self.on_start_finished(generation, kind, result),
            Event::PollTick { generation } => self.on_poll_tick(generation),
            Event::PollFinished { ticket, result } => self.on_poll_finished(ticket, result),
            Event::Push {
                generation,
                message,
            } => self.on_push(generation, message),
            Event::Settled { generation } => self.on_settled(generation),
            Event::PlatformLoaded { result } => self.on_platform_loaded(result),
            Event::PlatformsLoaded { result } => match result {
                Ok(list) => {
                    info!("Loaded {} platforms", list.len());
                    self.platforms = list;
                }
                Err(e) => warn!("Failed to load platforms: {}", e),
            },
        }
    }

    // ---------------------------------------------------------------------
    // Actions
    // ---------------------------------------------------------------------

    fn start(&mut self, action: Action) -> Result<(), ActionError> {
        if !self.is_idle() {
            info!("Rejecting action while busy (phase {:?})", self.engine.phase());
            return Err(ActionError::Busy);
        }

        let (request, order, namespace) = match self.prepare(action) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Validation failed: {}", e);
                self.engine.set_status(e.to_string());
                return Err(e.into());
            }
        };

        self.timers.cancel_all();
        self.push_connected = false;
        self.namespace = Some(namespace);

        let kind = request.kind();
        let generation = self.engine.begin(kind, order);

        let remote = self.remote.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = remote.start_operation(&request).await;
            let _ = tx.send(Event::StartFinished {
                generation,
                kind,
                result,
            });
        });
        Ok(())
    }

    fn resolve_namespace(&self, explicit: Option<String>) -> Result<String, ValidationError> {
        explicit
            .or_else(|| self.namespace.clone())
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty())
            .ok_or(ValidationError::MissingNamespace)
    }

    fn resolve_branch(&self, explicit: Option<String>) -> String {
        explicit
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| self.options.branch.clone())
    }

    fn prepare(
        &self,
        action: Action,
    ) -> Result<(OperationRequest, Vec<String>, String), ValidationError> {
        match action {
            Action::Deploy(input) => {
                let namespace = self.resolve_namespace(input.namespace)?;
                let order = canonical_order(&input.apps);
                if order.is_empty() {
                    return Err(ValidationError::EmptySelection);
                }
                let user_email = input
                    .user_email
                    .or_else(|| self.options.user_email.clone())
                    .unwrap_or_default();
                let request = OperationRequest::Deploy(DeployBody {
                    apps: order.clone(),
                    branch: self.resolve_branch(input.branch),
                    namespace: namespace.clone(),
                    user_email,
                });
                Ok((request, order, namespace))
            }
            Action::Add(input) => {
                let (body, order) = self.apps_body(input)?;
                let namespace = body.namespace.clone();
                Ok((OperationRequest::Add(body), order, namespace))
            }
            Action::Remove(input) => {
                let (body, order) = self.apps_body(input)?;
                let namespace = body.namespace.clone();
                Ok((OperationRequest::Remove(body), order, namespace))
            }
            Action::Delete(input) => {
                let namespace = self.resolve_namespace(input.namespace)?;
                if !input.confirm {
                    return Err(ValidationError::DeleteNotConfirmed);
                }
                let deployed: Vec<&String> = match &self.platform {
                    Some(p) if !p.deployed_application_ids.is_empty() => {
                        p.deployed_application_ids.iter().collect()
                    }
                    _ => return Err(ValidationError::NoPlatformToDelete),
                };
                let order = canonical_order(&deployed);
                let request = OperationRequest::Delete(DeleteBody {
                    branch: self.resolve_branch(input.branch),
                    namespace: namespace.clone(),
                });
                Ok((request, order, namespace))
            }
        }
    }

    fn apps_body(&self, input: AppsInput) -> Result<(AppsBody, Vec<String>), ValidationError> {
        let namespace = self.resolve_namespace(input.namespace)?;
        let order = canonical_order(&input.apps);
        if order.is_empty() {
            return Err(ValidationError::EmptySelection);
        }
        let body = AppsBody {
            apps: order.clone(),
            branch: self.resolve_branch(input.branch),
            namespace,
        };
        Ok((body, order))
    }

    // ---------------------------------------------------------------------
    // Operation tracking
    // ---------------------------------------------------------------------

    fn on_start_finished(
        &mut self,
        generation: u64,
        kind: ActionKind,
        result: Result<StartResponse, RemoteError>,
    ) {
        let res = match result {
            Ok(res) if !res.operation.trim().is_empty() => res,
            Ok(_) => {
                warn!("{} start returned no operation id", kind);
                self.engine
                    .start_failed(generation, "orchestrator returned no operation id");
                return;
            }
            Err(e) => {
                warn!("{} start failed: {}", kind, e);
                if self.engine.start_failed(generation, e.message()) {
                    self.timers.cancel_all();
                }
                return;
            }
        };

        if !self
            .engine
            .started(generation, &res.operation, res.accepted_text(kind))
        {
            return;
        }
        info!("{} started. Operation ID: {}", kind, res.operation);
        if let Some(ns) = res.namespace_name.as_ref().filter(|ns| !ns.trim().is_empty()) {
            self.namespace = Some(ns.clone());
        }
        self.subscribe_push(generation, &res.operation);
        self.start_polling(generation);
    }

    fn subscribe_push(&mut self, generation: u64, operation_id: &str) {
        let Some(push) = self.push.clone() else {
            return;
        };
        let mut subscription = push.subscribe(operation_id);
        let tx = self.events_tx.clone();
        self.timers.push = Some(tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                if tx.send(Event::Push { generation, message }).is_err() {
                    break;
                }
            }
        }));
        debug!("Subscribed to operation {}", operation_id);
    }

    /// The first tick fires immediately.
    fn start_polling(&mut self, generation: u64) {
        let period = self.options.tracking.poll_interval();
        let tx = self.events_tx.clone();
        self.timers.stop_polling();
        self.timers.poll = Some(tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(Event::PollTick { generation }).is_err() {
                    break;
                }
            }
        }));
    }

    fn on_poll_tick(&mut self, generation: u64) {
        let Some(ticket) = self.engine.next_poll(generation) else {
            return;
        };
        let Some(operation_id) = self.engine.operation_id().map(String::from) else {
            return;
        };
        let remote = self.remote.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = remote.operation_status(&operation_id).await;
            let _ = tx.send(Event::PollFinished { ticket, result });
        });
    }

    fn on_poll_finished(&mut self, ticket: PollTicket, result: Result<StatusResponse, RemoteError>) {
        match result {
            Ok(res) => {
                if self.engine.apply_poll(ticket, &res) == PollOutcome::Completed {
                    self.timers.stop_polling();
                    self.timers.unsubscribe();
                    self.push_connected = false;
                    self.arm_settle(ticket.generation);
                }
            }
            Err(e) => {
                if self.engine.poll_failed(ticket, e.message()) {
                    warn!("Status polling stopped: {}", e);
                    self.timers.cancel_all();
                    self.push_connected = false;
                }
            }
        }
    }

    fn arm_settle(&mut self, generation: u64) {
        let delay = self.options.tracking.settle_delay();
        let tx = self.events_tx.clone();
        self.timers.stop_settle();
        debug!("Waiting {:?} for the backend to settle", delay);
        self.timers.settle = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(Event::Settled { generation });
        }));
    }

    fn on_settled(&mut self, generation: u64) {
        self.timers.settle = None;
        if !self.engine.settled(generation) {
            return;
        }
        let namespace = self.namespace.clone();
        self.request_platform(namespace, true);
        self.request_platforms();
    }

    fn on_push(&mut self, generation: u64, message: PushMessage) {
        if generation != self.engine.generation() {
            return;
        }
        match message {
            PushMessage::Connected => {
                debug!("Push channel connected");
                self.push_connected = true;
            }
            PushMessage::Disconnected(reason) => {
                if self.push_connected {
                    warn!("Push channel dropped, continuing with polling: {}", reason);
                }
                self.push_connected = false;
            }
            PushMessage::Progress(event) => {
                self.engine.apply_push(generation, &event);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Platform state
    // ---------------------------------------------------------------------

    /// Returns whether a request was issued. `forced` is the post-operation
    /// refresh, which skips the debounce but never doubles up a load.
    fn request_platform(&mut self, namespace: Option<String>, forced: bool) -> bool {
        if self.platform_loading {
            debug!("Platform load already in progress");
            return false;
        }
        if !forced {
            if self.engine.phase() != Phase::Idle {
                debug!("Platform load skipped while an operation is active");
                return false;
            }
            let debounce = self.options.tracking.platform_debounce();
            if let Some(last) = self.last_platform_load {
                if last.elapsed() < debounce {
                    debug!("Platform load debounced (too soon)");
                    return false;
                }
            }
        }

        let namespace = namespace
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty())
            .or_else(|| self.namespace.clone());
        self.platform_loading = true;
        self.last_platform_load = Some(Instant::now());

        let remote = self.remote.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = remote.platform(namespace.as_deref()).await;
            let _ = tx.send(Event::PlatformLoaded { result });
        });
        true
    }

    fn on_platform_loaded(&mut self, result: Result<PlatformRecord, RemoteError>) {
        self.platform_loading = false;
        match result {
            Ok(record) => {
                let ns = record.effective_namespace().to_string();
                if !ns.is_empty() {
                    self.namespace = Some(ns);
                }
                info!(
                    "Platform loaded: {} ({} apps)",
                    record.effective_namespace(),
                    record.deployed_application_ids.len()
                );
                self.platform = Some(record);
            }
            Err(e) => {
                warn!("Failed to load platform: {}", e);
                self.engine
                    .set_status(format!("Error loading platform: {}", e.message()));
            }
        }
    }

    fn request_platforms(&mut self) {
        let remote = self.remote.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = remote.platforms().await;
            let _ = tx.send(Event::PlatformsLoaded { result });
        });
    }
}

fn initial_view() -> TrackerView {
    TrackerView {
        phase: Phase::Idle,
        running: false,
        idle: true,
        progress: 0,
        steps: Vec::new(),
        status: String::new(),
        logs: Vec::new(),
        logs_url: None,
        operation_id: None,
        platform: None,
        platforms: Vec::new(),
        namespace: None,
        push_connected: false,
    }
}

/// Cloneable handle to a running controller.
#[derive(Clone)]
pub struct TrackerHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<TrackerView>,
}

impl TrackerHandle {
    pub async fn deploy(&self, input: DeployInput) -> Result<(), ActionError> {
        self.start(Action::Deploy(input)).await
    }

    pub async fn add_apps(&self, input: AppsInput) -> Result<(), ActionError> {
        self.start(Action::Add(input)).await
    }

    pub async fn remove_apps(&self, input: AppsInput) -> Result<(), ActionError> {
        self.start(Action::Remove(input)).await
    }

    pub async fn delete_platform(&self, input: DeleteInput) -> Result<(), ActionError> {
        self.start(Action::Delete(input)).await
    }

    /// Returns `false` when the load was skipped (debounced, already in
    /// flight, or an operation is active). Skips are not errors.
    pub async fn load_platform(&self, namespace: Option<String>) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::LoadPlatform { namespace, reply })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub fn load_all_platforms(&self) {
        let _ = self.commands.send(Command::LoadAllPlatforms);
    }

    pub fn view(&self) -> TrackerView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerView> {
        self.view.clone()
    }

    /// Wait for the first view matching `pred`. `None` once the controller
    /// has stopped.
    pub async fn wait_for(&self, pred: impl FnMut(&TrackerView) -> bool) -> Option<TrackerView> {
        let mut rx = self.view.clone();
        let view = rx.wait_for(pred).await.ok()?;
        Some(view.clone())
    }

    async fn start(&self, action: Action) -> Result<(), ActionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Start { action, reply })
            .map_err(|_| ActionError::Stopped)?;
        rx.await.map_err(|_| ActionError::Stopped)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DONE_TEXT;
    use crate::remote::{PushEvent, PushSubscription, RemoteStep};
    use crate::steps::StepStatus;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeRemote {
        start_result: StdMutex<Option<Result<StartResponse, RemoteError>>>,
        statuses: StdMutex<VecDeque<Result<StatusResponse, RemoteError>>>,
        platform: StdMutex<Option<PlatformRecord>>,
        platform_delay: Duration,
        requests: StdMutex<Vec<OperationRequest>>,
        start_calls: AtomicUsize,
        status_calls: AtomicUsize,
        platform_calls: AtomicUsize,
        platforms_calls: AtomicUsize,
    }

    impl FakeRemote {
        fn with_statuses(statuses: Vec<Result<StatusResponse, RemoteError>>) -> Self {
            Self {
                statuses: StdMutex::new(statuses.into()),
                ..Default::default()
            }
        }

        fn starts(&self) -> usize {
            self.start_calls.load(Ordering::SeqCst)
        }

        fn polls(&self) -> usize {
            self.status_calls.load(Ordering::SeqCst)
        }

        fn platform_loads(&self) -> usize {
            self.platform_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteService for FakeRemote {
        async fn start_operation(
            &self,
            request: &OperationRequest,
        ) -> Result<StartResponse, RemoteError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            self.start_result.lock().unwrap().clone().unwrap_or_else(|| {
                Ok(StartResponse {
                    operation: "op-1".to_string(),
                    ..Default::default()
                })
            })
        }

        async fn operation_status(&self, _: &str) -> Result<StatusResponse, RemoteError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(StatusResponse::default()))
        }

        async fn platform(&self, namespace: Option<&str>) -> Result<PlatformRecord, RemoteError> {
            self.platform_calls.fetch_add(1, Ordering::SeqCst);
            if !self.platform_delay.is_zero() {
                time::sleep(self.platform_delay).await;
            }
            let configured = self.platform.lock().unwrap().clone();
            Ok(configured.unwrap_or_else(|| PlatformRecord {
                id: "p-1".to_string(),
                namespace: namespace.unwrap_or("team-a").to_string(),
                deployed_application_ids: ["gitea".to_string()].into_iter().collect(),
                status: "READY".to_string(),
                ..Default::default()
            }))
        }

        async fn platforms(&self) -> Result<Vec<PlatformRecord>, RemoteError> {
            self.platforms_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![PlatformRecord {
                id: "p-1".to_string(),
                namespace: "team-a".to_string(),
                ..Default::default()
            }])
        }
    }

    #[derive(Default)]
    struct FakePush {
        senders: StdMutex<Vec<mpsc::UnboundedSender<PushMessage>>>,
    }

    impl FakePush {
        fn sender(&self) -> mpsc::UnboundedSender<PushMessage> {
            self.senders.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl PushChannel for FakePush {
        fn subscribe(&self, _: &str) -> PushSubscription {
            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().unwrap().push(tx);
            PushSubscription::new(rx, None)
        }
    }

    fn options() -> TrackerOptions {
        TrackerOptions {
            tracking: TrackingConfig::default(),
            branch: "main".to_string(),
            user_email: Some("ops@example.com".to_string()),
            namespace: Some("team-a".to_string()),
        }
    }

    fn tracker(remote: &Arc<FakeRemote>, push: Option<&Arc<FakePush>>) -> TrackerHandle {
        let push = push.map(|p| p.clone() as Arc<dyn PushChannel>);
        Controller::spawn(remote.clone(), push, options())
    }

    async fn wait(handle: &TrackerHandle, pred: impl FnMut(&TrackerView) -> bool) -> TrackerView {
        time::timeout(Duration::from_secs(60), handle.wait_for(pred))
            .await
            .expect("view condition not reached")
            .expect("controller stopped")
    }

    fn status(done: bool, steps: &[(&str, &str)]) -> StatusResponse {
        StatusResponse {
            done,
            steps: Some(
                steps
                    .iter()
                    .map(|(id, status)| RemoteStep {
                        id: id.to_string(),
                        status: status.to_string(),
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn deploy_input(apps: &[&str]) -> DeployInput {
        DeployInput {
            apps: apps.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_updates_steps_and_progress() {
        let remote = Arc::new(FakeRemote::with_statuses(vec![Ok(status(
            false,
            &[("gitea", "SUCCESS")],
        ))]));
        let handle = tracker(&remote, None);

        handle.deploy(deploy_input(&["gitea", "confluence"])).await.unwrap();
        let view = wait(&handle, |v| v.progress == 50).await;

        assert!(view.running);
        assert!(!view.idle);
        assert_eq!(view.operation_id.as_deref(), Some("op-1"));
        assert_eq!(
            view.steps,
            vec![
                Step {
                    id: "gitea".into(),
                    status: StepStatus::Success
                },
                Step {
                    id: "confluence".into(),
                    status: StepStatus::Running
                },
            ]
        );

        let requests = remote.requests.lock().unwrap().clone();
        assert_eq!(
            requests,
            vec![OperationRequest::Deploy(DeployBody {
                apps: vec!["gitea".into(), "confluence".into()],
                branch: "main".into(),
                namespace: "team-a".into(),
                user_email: "ops@example.com".into(),
            })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn done_completes_once_and_refreshes_platform_after_settle() {
        let remote = Arc::new(FakeRemote::with_statuses(vec![Ok(status(
            true,
            &[("gitea", "SUCCESS"), ("confluence", "RUNNING")],
        ))]));
        let handle = tracker(&remote, None);

        handle.deploy(deploy_input(&["gitea", "confluence"])).await.unwrap();
        let done = wait(&handle, |v| v.phase == Phase::Completing).await;
        assert_eq!(done.progress, 100);
        assert_eq!(done.status, DONE_TEXT);
        assert!(!done.running);
        assert!(!done.idle);
        assert_eq!(done.steps[1].status, StepStatus::Running);

        let settled = wait(&handle, |v| v.idle && v.platform.is_some()).await;
        assert_eq!(settled.progress, 100);
        assert_eq!(settled.phase, Phase::Idle);

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(remote.polls(), 1);
        assert_eq!(remote.platform_loads(), 1);
        assert_eq!(remote.platforms_calls.load(Ordering::SeqCst), 1);
        let view = wait(&handle, |v| !v.platforms.is_empty()).await;
        assert_eq!(view.platforms.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_error_stops_polling_and_restores_idle() {
        let remote = Arc::new(FakeRemote::with_statuses(vec![
            Ok(status(false, &[])),
            Err(RemoteError::Status {
                status: 502,
                message: "bad gateway".into(),
            }),
        ]));
        let handle = tracker(&remote, None);

        handle.deploy(deploy_input(&["gitea"])).await.unwrap();
        let view = wait(&handle, |v| v.idle).await;
        assert!(!view.running);
        assert_eq!(view.status, "Error polling status: bad gateway");

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(remote.polls(), 2);
        assert_eq!(remote.platform_loads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_error_surfaces_message() {
        let remote = Arc::new(FakeRemote::default());
        *remote.start_result.lock().unwrap() = Some(Err(RemoteError::from_body(
            409,
            r#"{"error":"namespace locked"}"#,
        )));
        let handle = tracker(&remote, None);

        handle
            .add_apps(AppsInput {
                apps: vec!["jira".into()],
                ..Default::default()
            })
            .await
            .unwrap();
        let view = wait(&handle, |v| v.idle).await;
        assert_eq!(view.status, "Error: namespace locked");
        assert!(view.steps.is_empty());

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(remote.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_tracker_rejects_actions_without_side_effects() {
        let remote = Arc::new(FakeRemote::default());
        let handle = tracker(&remote, None);

        handle.deploy(deploy_input(&["gitea"])).await.unwrap();
        let before = wait(&handle, |v| v.phase == Phase::Tracking).await;

        let err = handle
            .add_apps(AppsInput {
                apps: vec!["jira".into()],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::Busy);
        let err = handle
            .delete_platform(DeleteInput {
                confirm: true,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::Busy);

        let after = handle.view();
        assert_eq!(after.steps, before.steps);
        assert_eq!(after.logs, before.logs);
        assert_eq!(remote.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_platform_load_blocks_actions() {
        let remote = Arc::new(FakeRemote {
            platform_delay: Duration::from_secs(5),
            ..Default::default()
        });
        let handle = tracker(&remote, None);

        assert!(handle.load_platform(None).await);
        assert!(!handle.view().idle);
        assert_eq!(
            handle.deploy(deploy_input(&["gitea"])).await,
            Err(ActionError::Busy)
        );
        assert_eq!(remote.starts(), 0);

        let view = wait(&handle, |v| v.idle).await;
        assert!(view.platform.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn platform_load_is_debounced() {
        let remote = Arc::new(FakeRemote::default());
        let handle = tracker(&remote, None);

        assert!(handle.load_platform(Some("team-b".into())).await);
        let first = wait(&handle, |v| v.idle && v.platform.is_some()).await;
        assert_eq!(first.namespace.as_deref(), Some("team-b"));

        assert!(!handle.load_platform(Some("team-b".into())).await);
        assert_eq!(remote.platform_loads(), 1);
        assert_eq!(handle.view(), first);

        time::sleep(Duration::from_millis(1100)).await;
        assert!(handle.load_platform(None).await);
        assert_eq!(remote.platform_loads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_failures_do_not_start_anything() {
        let remote = Arc::new(FakeRemote::default());
        let handle = Controller::spawn(
            remote.clone(),
            None,
            TrackerOptions {
                namespace: None,
                ..options()
            },
        );

        let err = handle.deploy(deploy_input(&["gitea"])).await.unwrap_err();
        assert_eq!(err, ActionError::Validation(ValidationError::MissingNamespace));

        let err = handle
            .remove_apps(AppsInput {
                apps: vec![],
                namespace: Some("team-a".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::Validation(ValidationError::EmptySelection));

        let err = handle
            .delete_platform(DeleteInput {
                namespace: Some("team-a".into()),
                confirm: false,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::Validation(ValidationError::DeleteNotConfirmed));

        let err = handle
            .delete_platform(DeleteInput {
                namespace: Some("team-a".into()),
                confirm: true,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::Validation(ValidationError::NoPlatformToDelete));

        let view = wait(&handle, |v| v.status == "No platform to delete").await;
        assert!(view.idle);
        assert!(view.steps.is_empty());
        assert_eq!(remote.starts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_seeds_steps_from_loaded_platform() {
        let remote = Arc::new(FakeRemote::default());
        *remote.platform.lock().unwrap() = Some(PlatformRecord {
            id: "p-1".into(),
            namespace: "team-a".into(),
            deployed_application_ids: ["jira", "gitea", "probe"]
                .into_iter()
                .map(String::from)
                .collect(),
            ..Default::default()
        });
        let handle = tracker(&remote, None);

        assert!(handle.load_platform(None).await);
        wait(&handle, |v| v.idle && v.platform.is_some()).await;

        handle
            .delete_platform(DeleteInput {
                confirm: true,
                ..Default::default()
            })
            .await
            .unwrap();
        let view = wait(&handle, |v| v.phase == Phase::Tracking).await;
        let ids: Vec<_> = view.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["gitea", "jira"]);
        assert_eq!(
            remote.requests.lock().unwrap().last(),
            Some(&OperationRequest::Delete(DeleteBody {
                branch: "main".into(),
                namespace: "team-a".into(),
            }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn push_events_merge_and_unsubscribe_on_completion() {
        let remote = Arc::new(FakeRemote::with_statuses(vec![Ok(status(false, &[]))]));
        // Keep later ticks from completing before the push assertions.
        remote
            .statuses
            .lock()
            .unwrap()
            .extend((0..20).map(|_| Ok(status(false, &[]))));
        let push = Arc::new(FakePush::default());
        let handle = tracker(&remote, Some(&push));

        handle.deploy(deploy_input(&["gitea", "jira"])).await.unwrap();
        wait(&handle, |v| v.phase == Phase::Tracking).await;
        let tx = push.sender();

        tx.send(PushMessage::Connected).unwrap();
        tx.send(PushMessage::Progress(PushEvent {
            step: "jira".into(),
            status: "success".into(),
            log: Some("jira ready".into()),
            all_logs: Some(vec!["10:00:01 jira ready".into(), "tail".into()]),
        }))
        .unwrap();
        let view = wait(&handle, |v| v.progress == 50).await;
        assert!(view.push_connected);
        assert_eq!(view.logs.len(), 2);
        assert_eq!(view.logs[0].line, "jira ready");

        tx.send(PushMessage::Disconnected("Stream ended".into())).unwrap();
        let view = wait(&handle, |v| !v.push_connected).await;
        assert!(view.running);

        remote.statuses.lock().unwrap().clear();
        remote
            .statuses
            .lock()
            .unwrap()
            .push_back(Ok(status(true, &[("gitea", "SUCCESS")])));
        wait(&handle, |v| v.phase != Phase::Tracking).await;
        time::timeout(Duration::from_secs(5), tx.closed())
            .await
            .expect("subscription was not released");
    }

    #[tokio::test(start_paused = true)]
    async fn new_operation_after_completion_replaces_state() {
        let remote = Arc::new(FakeRemote::with_statuses(vec![Ok(StatusResponse {
            done: true,
            events: Some(vec!["old line".into()]),
            ..Default::default()
        })]));
        let handle = tracker(&remote, None);

        handle.deploy(deploy_input(&["gitea"])).await.unwrap();
        wait(&handle, |v| v.idle && v.platform.is_some()).await;

        handle
            .add_apps(AppsInput {
                apps: vec!["JIRA".into(), "jira".into()],
                ..Default::default()
            })
            .await
            .unwrap();
        let view = handle.view();
        assert!(!view.idle);
        assert_eq!(view.progress, 0);
        assert!(view.logs.is_empty());
        assert_eq!(view.steps.len(), 1);
        assert_eq!(view.steps[0].id, "jira");
        assert_ne!(view.status, DONE_TEXT);
    }
}
