//! Per-event flow: classify, persist, resolve, complete, reply.
//!
//! Every inbound event runs [`handle_event`] in its own task. Failures are
//! logged and the event is dropped; nothing internal is ever posted back to
//! the chat.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use chippy_core::errors::CompletionError;
use chippy_core::platform::{ChatPlatform, InboundMessage};
use chippy_core::provider::{CompletionProvider, ImageGenerator};
use chippy_core::settings::ContextPolicy;
use chippy_core::{BotSettings, Message, MessageId, Role, RoleClassifier};
use chippy_store::{MessageRepo, ThreadResolver};

use crate::error::PipelineError;
use crate::platform_thread::PlatformResolver;
use crate::seeder::ContextSeeder;
use crate::strategy::ThreadStrategy;

/// Everything an event task needs. Built once, shared behind an `Arc`.
pub struct BotContext {
    settings: BotSettings,
    platform: Arc<dyn ChatPlatform>,
    completion: Arc<dyn CompletionProvider>,
    images: Option<Arc<dyn ImageGenerator>>,
    store: MessageRepo,
    classifier: RoleClassifier,
    seeder: ContextSeeder,
    threads: ThreadStrategy,
}

impl BotContext {
    pub fn new(
        settings: BotSettings,
        platform: Arc<dyn ChatPlatform>,
        completion: Arc<dyn CompletionProvider>,
        store: MessageRepo,
    ) -> Self {
        let classifier = RoleClassifier::new(settings.context_marker.clone());
        let seeder = ContextSeeder::from_settings(&settings);
        let threads = if settings.store_locally {
            ThreadStrategy::Stored {
                resolver: ThreadResolver::new(store.clone()).with_max_depth(settings.max_thread_depth),
                gap_retry: settings.gap_retry.clone(),
            }
        } else {
            ThreadStrategy::Platform(
                PlatformResolver::new(platform.clone(), classifier.clone(), settings.platform_backoff.clone())
                    .with_gap_retry(settings.gap_retry.clone())
                    .with_max_depth(settings.max_thread_depth),
            )
        };
        Self {
            settings,
            platform,
            completion,
            images: None,
            store,
            classifier,
            seeder,
            threads,
        }
    }

    pub fn with_images(mut self, images: Arc<dyn ImageGenerator>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn settings(&self) -> &BotSettings {
        &self.settings
    }

    pub fn store(&self) -> &MessageRepo {
        &self.store
    }

    pub fn seeder(&self) -> &ContextSeeder {
        &self.seeder
    }

    pub fn strategy(&self) -> &ThreadStrategy {
        &self.threads
    }

    fn wants_image(&self, prompt: &str) -> bool {
        self.settings.allow_images
            && prompt
                .to_lowercase()
                .starts_with(&self.settings.image_prompt.to_lowercase())
    }
}

/// What the pipeline did with an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A completion was posted as a reply.
    Replied,
    /// A generated image was posted as a reply.
    ImageReplied,
    /// The message sets a conversation context; stored, not answered.
    ContextSet,
    /// The bot's own message; stored, not answered.
    OwnMessage,
    /// The thread has no system root under the active policy.
    NotEligible,
    /// The event carries the sentinel id; dropped before anything is stored.
    Reserved,
}

/// Parent a message is stored under.
///
/// A mentioned context message starts a new thread. A mention with no
/// reference hangs off the sentinel so it inherits the default context.
fn placement(mentioned: bool, role: Role, reference: Option<MessageId>) -> Option<MessageId> {
    match (mentioned, role, reference) {
        (true, Role::System, _) => None,
        (true, _, None) => Some(MessageId::SENTINEL),
        (_, _, reference) => reference,
    }
}

#[instrument(skip_all, fields(message_id = %msg.id, author_id = %msg.author.id))]
pub async fn handle(ctx: &BotContext, msg: &InboundMessage) -> Result<Outcome, PipelineError> {
    if msg.id.is_sentinel() {
        warn!("event uses the reserved sentinel id, dropping");
        return Ok(Outcome::Reserved);
    }

    let bot = ctx.platform.bot_identity();
    let mentioned = msg.mentions_user(bot.id);
    let prompt = msg.prompt();

    if mentioned && ctx.wants_image(prompt) {
        match &ctx.images {
            Some(images) => {
                let timeout = ctx.settings.completion_timeout();
                let attachment = tokio::time::timeout(timeout, images.generate(prompt, ctx.settings.image_size))
                    .await
                    .map_err(|_| CompletionError::Timeout(timeout))??;
                debug!(filename = %attachment.filename, bytes = attachment.data.len(), "image generated");
                ctx.platform
                    .reply_with_attachment(msg, prompt, attachment)
                    .await
                    .map_err(PipelineError::Reply)?;
                return Ok(Outcome::ImageReplied);
            }
            None => warn!("image requested but no image generator is configured"),
        }
    }

    let role = ctx.classifier.classify(prompt, &msg.author, bot);

    if ctx.settings.store_locally {
        let parent = placement(mentioned, role, msg.reference);
        ctx.store.upsert(msg.id, parent, role, prompt)?;
        debug!(%role, parent_id = ?parent.map(MessageId::get), "message stored");
    }

    if role == Role::System {
        return Ok(Outcome::ContextSet);
    }
    if msg.author.id == bot.id {
        return Ok(Outcome::OwnMessage);
    }

    let prepared = match ctx.threads.resolve(msg).await {
        Ok(thread) => ctx.seeder.prepare(thread),
        Err(e) if e.is_transient() => {
            warn!(error = %e, "thread still incomplete, answering without history");
            let alone = Message::new(msg.id, msg.reference, role, prompt);
            ctx.seeder.prepare_with(vec![alone], ContextPolicy::PrependDefault)
        }
        Err(e) => return Err(e.into()),
    };
    let Some(thread) = prepared else {
        debug!("thread has no system root, not answering");
        return Ok(Outcome::NotEligible);
    };

    let timeout = ctx.settings.completion_timeout();
    let response = tokio::time::timeout(timeout, ctx.completion.complete(&thread))
        .await
        .map_err(|_| CompletionError::Timeout(timeout))??;

    ctx.platform.reply(msg, &response).await.map_err(PipelineError::Reply)?;
    info!(
        thread_len = thread.len(),
        model = ctx.completion.model(),
        reply_len = response.len(),
        "replied"
    );
    Ok(Outcome::Replied)
}

/// Run the pipeline for one event and log the result. Never fails.
pub async fn handle_event(ctx: &BotContext, msg: InboundMessage) {
    match handle(ctx, &msg).await {
        Ok(outcome) => debug!(message_id = %msg.id, ?outcome, "event handled"),
        Err(e) => error!(
            message_id = %msg.id,
            error_kind = e.error_kind(),
            error = %e,
            "event dropped"
        ),
    }
}

/// Event loop: one task per inbound event until `cancel` fires or the
/// channel closes. In-flight tasks, and any events they cause to be queued,
/// are finished before returning.
pub async fn run(ctx: Arc<BotContext>, mut events: mpsc::UnboundedReceiver<InboundMessage>, cancel: CancellationToken) {
    let mut tasks = JoinSet::new();
    info!(strategy = ctx.threads.name(), policy = ?ctx.seeder.policy(), "event loop started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
            event = events.recv() => match event {
                Some(msg) => {
                    let ctx = ctx.clone();
                    tasks.spawn(async move { handle_event(&ctx, msg).await });
                }
                None => break,
            },
        }
    }

    info!(in_flight = tasks.len(), "event loop stopping");
    loop {
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
        match events.try_recv() {
            Ok(msg) => {
                let ctx = ctx.clone();
                tasks.spawn(async move { handle_event(&ctx, msg).await });
            }
            Err(_) => break,
        }
    }
    info!("event loop stopped");
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "event task panicked");
    }
}
