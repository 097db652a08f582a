//! Data logging toolkit.

use crate::{common::*, utils::RateCounter};

pub use logging_message::*;
pub use logging_worker::*;

mod logging_message {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct LoggingMessage {
        pub tag: Cow<'static, str>,
        pub step: usize,
        pub kind: LoggingMessageKind,
    }

    #[derive(Debug, Clone)]
    pub enum LoggingMessageKind {
        /// Named scalar values.
        Scalars(Vec<(String, f64)>),
        /// Named images.
        Images(Vec<(String, DynamicImage)>),
    }

    impl LoggingMessage {
        pub fn new_scalars<S, I, N>(tag: S, step: usize, scalars: I) -> Self
        where
            S: Into<Cow<'static, str>>,
            I: IntoIterator<Item = (N, f64)>,
            N: Into<String>,
        {
            Self {
                tag: tag.into(),
                step,
                kind: LoggingMessageKind::Scalars(
                    scalars
                        .into_iter()
                        .map(|(name, value)| (name.into(), value))
                        .collect(),
                ),
            }
        }

        pub fn new_images<S, I, N>(tag: S, step: usize, images: I) -> Self
        where
            S: Into<Cow<'static, str>>,
            I: IntoIterator<Item = (N, DynamicImage)>,
            N: Into<String>,
        {
            Self {
                tag: tag.into(),
                step,
                kind: LoggingMessageKind::Images(
                    images
                        .into_iter()
                        .map(|(name, image)| (name.into(), image))
                        .collect(),
                ),
            }
        }
    }
}

mod logging_worker {
    use super::*;

    /// One row of the scalar log.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ScalarRecord {
        pub step: usize,
        pub tag: String,
        pub name: String,
        pub value: f64,
    }

    /// The data logging worker.
    #[derive(Derivative)]
    #[derivative(Debug)]
    pub struct LoggingWorker {
        image_dir: PathBuf,
        #[derivative(Debug = "ignore")]
        scalar_writer: csv::Writer<std::fs::File>,
        rate_counter: RateCounter,
        rx: broadcast::Receiver<LoggingMessage>,
    }

    impl LoggingWorker {
        /// Create a data logging worker.
        pub async fn new(logging_dir: &Path, rx: broadcast::Receiver<LoggingMessage>) -> Result<Self> {
            let image_dir = logging_dir.join("images");
            tokio::fs::create_dir_all(&image_dir).await?;

            let scalar_path = logging_dir.join("losses.csv");
            let scalar_writer = csv::Writer::from_path(&scalar_path)
                .with_context(|| format!("unable to create '{}'", scalar_path.display()))?;

            Ok(Self {
                image_dir,
                scalar_writer,
                rate_counter: RateCounter::with_second_interval(),
                rx,
            })
        }

        /// Runs until every sender is dropped.
        pub async fn start(mut self) -> Result<()> {
            loop {
                let LoggingMessage { tag, step, kind } = match self.rx.recv().await {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        warn!("logging worker lagged, {} messages are dropped", count);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                self.rate_counter.add(1.0);

                match kind {
                    LoggingMessageKind::Scalars(scalars) => {
                        self.log_scalars(&tag, step, scalars)?;
                    }
                    LoggingMessageKind::Images(images) => {
                        self.log_images(&tag, step, images).await?;
                    }
                }

                if let Some(rate) = self.rate_counter.rate() {
                    info!("processed {:.2} events/s", rate);
                }
            }

            self.scalar_writer.flush()?;
            Ok(())
        }

        fn log_scalars(&mut self, tag: &str, step: usize, scalars: Vec<(String, f64)>) -> Result<()> {
            for (name, value) in scalars {
                self.scalar_writer.serialize(ScalarRecord {
                    step,
                    tag: tag.to_owned(),
                    name,
                    value,
                })?;
            }
            self.scalar_writer.flush()?;
            Ok(())
        }

        async fn log_images(
            &self,
            tag: &str,
            step: usize,
            images: Vec<(String, DynamicImage)>,
        ) -> Result<()> {
            let paths: Vec<_> = images
                .iter()
                .map(|(name, _)| {
                    self.image_dir
                        .join(format!("{}_{}_{:08}.png", tag, name, step))
                })
                .collect();

            tokio::task::spawn_blocking(move || -> Result<()> {
                for (path, (_, image)) in izip!(paths, images) {
                    image
                        .save(&path)
                        .with_context(|| format!("unable to save '{}'", path.display()))?;
                }
                Ok(())
            })
            .await??;
            Ok(())
        }
    }

    /// Starts the data logging worker.
    pub async fn logging_worker(
        logging_dir: Arc<Path>,
        rx: broadcast::Receiver<LoggingMessage>,
    ) -> Result<()> {
        LoggingWorker::new(&logging_dir, rx).await?.start().await
    }
}
