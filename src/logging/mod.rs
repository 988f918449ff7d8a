use std::io::{self, Write};

use env_logger::Builder;
use tokio::{
    fs::{create_dir_all, metadata, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        watch,
    },
};

use crate::{config, core::AppResult};

pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let data = buf.to_vec();
        self.sender.send(data).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

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

    fn create_async_writer(&self) -> AsyncWriter {
        AsyncWriter {
            sender: self.sender.clone(),
        }
    }

    /// Install env_logger. `RUST_LOG` wins over the configured level.
    ///
    /// With `log.path` set, records go through the channel drained by `run`.
    pub fn init_env_logger(&self) {
        let mut builder = Builder::new();
        builder.filter_level(self.config.level_filter());
        if let Ok(filters) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filters);
        }
        if self.config.path.is_some() {
            let writer = self.create_async_writer();
            builder.target(env_logger::Target::Pipe(Box::new(writer)));
        }
        if let Err(e) = builder.try_init() {
            eprintln!("Logger already initialized: {e}");
        }
    }

    /// Drain buffered records into the log file until shutdown.
    ///
    /// Returns immediately when no file path is configured.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AppResult<()> {
        let Some(log_file_path) = self.config.path.clone() else {
            return Ok(());
        };

        if let Some(parent) = std::path::Path::new(&log_file_path).parent() {
            if !parent.as_os_str().is_empty() && metadata(parent).await.is_err() {
                create_dir_all(parent).await?;
            }
        }

        let mut file = BufWriter::new(
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(&log_file_path)
                .await?,
        );
        // only `AsyncWriter`s hold senders from here on
        drop(self.sender);

        loop {
            tokio::select! {
                biased;
                // Shutdown signal handling
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("Shutdown signal received, stopping write log");
                        break;
                    }
                },

                data = self.receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(e) = file.write_all(&data).await {
                                eprintln!("Failed to write to log file: {e}");
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // pick up anything logged before shutdown
        while let Ok(data) = self.receiver.try_recv() {
            file.write_all(&data).await?;
        }
        file.flush().await?;
        Ok(())
    }
}
