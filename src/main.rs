//! Line-based chat server driving `pipeframe` pipelines over TCP.
//!
//! Each accepted socket gets its own pipeline: a line framer, the idle
//! monitor and heartbeat, a UTF-8 codec and the shared chat room. The
//! connection task plays the I/O layer, feeding socket reads, timer ticks
//! and mailbox messages into the pipeline and flushing what the pipeline
//! hands to its transport.

mod cli;

use std::{sync::Arc, time::Duration};

use bytes::BytesMut;
use clap::Parser;
use pipeframe::{
    BroadcastGroup,
    ChannelTransport,
    ChatRoom,
    ConnectionId,
    EchoPolicy,
    Heartbeat,
    IdleConfig,
    IdleMonitor,
    Mailbox,
    MailboxEvent,
    Pipeline,
    PipelineError,
    Tick,
    TokioTimer,
    TransportCommand,
    codec::{CodecStage, Utf8Codec},
    frame::{DelimiterCodec, FramingStage},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener,
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    signal,
    sync::mpsc::UnboundedReceiver,
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::EnvFilter;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Settings shared by every connection task.
#[derive(Clone, Debug)]
struct Settings {
    idle: IdleConfig,
    max_line: usize,
    mailbox: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = cli::Cli::parse();
    #[cfg(feature = "metrics")]
    if let Some(addr) = cli.metrics {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(%addr, "serving metrics");
    }

    let echo = if cli.no_echo {
        EchoPolicy::ExcludeSender
    } else {
        EchoPolicy::IncludeSender
    };
    let room = BroadcastGroup::<String>::new("chat").with_echo_policy(echo);
    let settings = Arc::new(Settings {
        idle: IdleConfig::all_idle(Duration::from_secs(cli.idle_secs)),
        max_line: cli.max_line,
        mailbox: cli.mailbox,
    });

    let listener = TcpListener::bind(cli.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, ?echo, "chat server listening");

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut next_id = 1_u64;

    loop {
        select! {
            _ = &mut ctrl_c => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let id = ConnectionId::new(next_id);
                    next_id += 1;
                    tracing::info!(connection = %id, %peer, "accepted connection");
                    let room = room.clone();
                    let settings = Arc::clone(&settings);
                    let shutdown = shutdown.clone();
                    tracker.spawn(async move {
                        if let Err(err) = serve(stream, id, room, &settings, shutdown).await {
                            tracing::warn!(
                                connection = %id,
                                error = %err,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    tracing::info!("shutting down");
    room.close_all();
    shutdown.cancel();
    tracker.close();
    tracker.wait().await;
    Ok(())
}

async fn serve(
    stream: TcpStream,
    id: ConnectionId,
    room: BroadcastGroup<String>,
    settings: &Settings,
    shutdown: CancellationToken,
) -> pipeframe::Result<()> {
    let (transport, commands) = ChannelTransport::new();
    let (timer, ticks) = TokioTimer::new();
    let mut pipeline = Pipeline::builder(id, Arc::new(transport))
        .timer(Arc::new(timer))
        .mailbox_capacity(settings.mailbox)
        .stage("framer", FramingStage::new(DelimiterCodec::lines(settings.max_line)?))
        .stage("idle", IdleMonitor::new(settings.idle))
        .stage("heartbeat", Heartbeat::default())
        .stage("text", CodecStage::new(Utf8Codec))
        .stage("chat", ChatRoom::new(room))
        .build()?;
    let mailbox = pipeline.take_mailbox().ok_or(PipelineError::Closed)?;
    pipeline.on_connect();

    let (reader, writer) = stream.into_split();
    let mut conn = Connection {
        pipeline,
        mailbox,
        commands,
        ticks,
        reader,
        writer,
        buf: BytesMut::with_capacity(4096),
    };
    let outcome = conn.run(&shutdown).await;

    conn.pipeline.on_close();
    let _ = conn.writer.shutdown().await;
    tracing::info!(connection = %id, "connection closed");
    outcome
}

/// One socket and the pipeline serving it.
struct Connection {
    pipeline: Pipeline,
    mailbox: Mailbox,
    commands: UnboundedReceiver<TransportCommand>,
    ticks: UnboundedReceiver<Tick>,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    buf: BytesMut,
}

impl Connection {
    /// Pump events into the pipeline until the socket or the pipeline
    /// closes. Queued writes are flushed before anything else.
    async fn run(&mut self, shutdown: &CancellationToken) -> pipeframe::Result<()> {
        loop {
            let open = self.pipeline.is_open();
            select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(TransportCommand::Write(bytes)) => self.writer.write_all(&bytes).await?,
                    Some(TransportCommand::Close) | None => return Ok(()),
                },
                () = shutdown.cancelled(), if open => self.pipeline.close(),
                read = self.reader.read_buf(&mut self.buf), if open => {
                    if read? == 0 {
                        return Ok(());
                    }
                    self.pipeline.on_data(self.buf.split().freeze());
                }
                Some(tick) = self.ticks.recv(), if open => self.pipeline.on_idle_tick(tick.axis),
                Some(event) = self.mailbox.recv(), if open => match event {
                    MailboxEvent::Message(msg) => {
                        if let Err(err) = self.pipeline.write(msg) {
                            tracing::debug!(
                                connection = %self.pipeline.id(),
                                error = %err,
                                "queued write failed"
                            );
                        }
                    }
                    MailboxEvent::Close => self.pipeline.close(),
                },
            }
        }
    }
}
