//! Telegram-facing binding: the bot instance, the update dispatcher and
//! the client implementations behind the engine's seams.

mod client;
mod config;

use crate::monitor::{self, Scheduler, Store};
use crate::prelude::*;
use crate::{db, Result};
use client::{PostBuffer, TgChannelClient};
use dptree::di::DependencyMap;
use std::sync::Arc;
use teloxide::adaptors::{CacheMe, Throttle, Trace};
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use tokio::sync::watch;

pub(crate) use config::*;

pub(crate) type Bot = Trace<CacheMe<Throttle<teloxide::Bot>>>;

pub(crate) struct RunBotOptions {
    pub(crate) tg_cfg: Config,
    pub(crate) monitor_cfg: monitor::Config,
    pub(crate) db: db::Repo,
}

pub(crate) async fn run_bot(opts: RunBotOptions) -> Result {
    let bot: Bot = teloxide::Bot::new(opts.tg_cfg.token)
        .throttle(Default::default())
        .cache_me()
        .trace(teloxide::adaptors::trace::Settings::all());

    let posts = Arc::new(PostBuffer::default());
    let client = Arc::new(TgChannelClient {
        bot: bot.clone(),
        posts: posts.clone(),
    });

    let store: Arc<dyn Store> = Arc::new(opts.db);

    let scheduler = Arc::new(Scheduler::new(
        store,
        client.clone(),
        client,
        opts.monitor_cfg.tick_interval,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = tokio::spawn(scheduler.run(shutdown_rx));

    let mut di = DependencyMap::new();
    di.insert(posts);

    info!("Starting bot...");

    let handler = dptree::entry().branch(
        Update::filter_channel_post().endpoint(observe_channel_post),
    );

    Dispatcher::builder(bot, handler)
        // Every other update kind is none of this bot's business.
        .default_handler(|_| std::future::ready(()))
        .dependencies(di)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Bot stopped, letting the monitoring loop wind down...");

    let _ = shutdown_tx.send(true);

    if let Err(err) = monitor_task.await {
        error!(err = tracing_err(&err), "Monitoring task crashed");
    }

    Ok(())
}

async fn observe_channel_post(message: Message, posts: Arc<PostBuffer>) -> ResponseResult<()> {
    trace!(
        chat = %message.chat.id,
        post = message.id.0,
        "Received a channel post"
    );

    metrics::increment_counter!("tg_updates_total", "kind" => "channel_post");

    posts.record(&message);

    Ok(())
}
