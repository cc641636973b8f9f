use std::io::{self, Write};

use env_logger::Builder;
use log::LevelFilter;
use tokio::{
    fs::{create_dir_all, metadata, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        watch,
    },
};

use crate::{
    config::{self, Config},
    core::error::{Error, Result},
};

pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let data = buf.to_vec();
        self.sender
            .send(data)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// File logger: `log` records go through a channel to an async file writer
pub struct Logger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Self {
            sender,
            receiver,
            config,
        }
    }

    /// Logger for the configured file, if any
    pub fn from_config(config: &Config) -> Option<Self> {
        config.log.clone().map(Self::new)
    }

    fn create_async_writer(&self) -> AsyncWriter {
        AsyncWriter {
            sender: self.sender.clone(),
        }
    }

    /// Install the global logger writing into this logger's channel.
    ///
    /// With `debug_log_enabled` the crate's own records are kept down to
    /// `Debug` regardless of the configured level.
    pub fn init_env_logger(&self, debug_log_enabled: bool) -> Result<()> {
        let writer = self.create_async_writer();
        let mut builder = Builder::from_env(env_logger::Env::default());
        builder.filter(None, self.config.level_filter());
        if debug_log_enabled {
            builder.filter(Some(env!("CARGO_CRATE_NAME")), LevelFilter::Debug);
        }
        builder
            .target(env_logger::Target::Pipe(Box::new(writer)))
            .try_init()
            .map_err(|e| Error::Logger(e.to_string()))
    }

    /// Drain the channel into the log file until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let log_file_path = &self.config.path;

        if let Some(parent) = std::path::Path::new(log_file_path).parent() {
            if metadata(parent).await.is_err() {
                create_dir_all(parent).await?;
            }
        }

        let mut file = BufWriter::new(
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(log_file_path)
                .await?,
        );

        loop {
            tokio::select! {
                biased;
                // Shutdown signal handling
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("Shutdown signal received, stopping write log");
                        break;
                    }
                },

                data = self.receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(e) = file.write_all(&data).await {
                                log::error!("Failed to write to log file: {}", e);
                            }
                        }
                        None => {
                            log::info!("Log channel closed, stopping write log");
                            break;
                        }
                    }
                }
            }
        }

        // keep whatever was queued before shutdown
        while let Ok(data) = self.receiver.try_recv() {
            file.write_all(&data).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

/// Plain stderr logging, honouring `RUST_LOG` on top of `level`
pub fn init_stderr_logger(level: LevelFilter, debug_log_enabled: bool) -> Result<()> {
    let mut builder = Builder::from_env(env_logger::Env::default());
    builder.filter(None, level);
    if debug_log_enabled {
        builder.filter(Some(env!("CARGO_CRATE_NAME")), LevelFilter::Debug);
    }
    builder
        .target(env_logger::Target::Stderr)
        .try_init()
        .map_err(|e| Error::Logger(e.to_string()))
}
