use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::queue::RetryPolicy;

/// External office converter used to turn rendered documents into PDF.
///
/// The rendered document is written to a scratch directory as
/// `document.<input_extension>` and the program is invoked as
/// `<program> <args...> --outdir <dir> <file>`.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Extension given to the rendered input file
    pub input_extension: String,
    /// Extension the converter produces
    pub output_extension: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: "soffice".to_string(),
            args: vec![
                "--headless".to_string(),
                "--convert-to".to_string(),
                "pdf".to_string(),
            ],
            input_extension: "html".to_string(),
            output_extension: "pdf".to_string(),
        }
    }
}

/// External QR encoder. Invoked as `<program> -o - -s <module> -m <margin>
/// <url>` and expected to write a PNG to stdout.
#[derive(Debug, Clone)]
pub struct QrConfig {
    pub program: String,
    pub margin: u32,
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            program: "qrencode".to_string(),
            margin: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum signing pipelines running at once
    pub concurrency: usize,
    /// Maximum jobs leased from the queue but not yet finished
    pub prefetch: usize,
    /// Maximum jobs held by the queue, dead ones included
    pub queue_capacity: usize,
    /// Where the queue is persisted across restarts
    pub snapshot_path: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            prefetch: 32,
            queue_capacity: 10_000,
            snapshot_path: None,
        }
    }
}

/// Size of an image placed into a rendered document, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base of the public document lookup URL encoded into QR codes
    pub public_base_url: String,
    /// Upper bound for each render, convert and QR call
    pub collaborator_timeout: Duration,
    /// Pixel width requested from the QR encoder
    pub qr_pixels: u32,
    pub signature_size: ImageSize,
    pub qr_size: ImageSize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:5173".to_string(),
            collaborator_timeout: Duration::from_secs(60),
            qr_pixels: 100,
            signature_size: ImageSize {
                width: 150,
                height: 100,
            },
            qr_size: ImageSize {
                width: 250,
                height: 250,
            },
        }
    }
}

impl PipelineConfig {
    /// Stable public URL for a document; this is what the QR code encodes.
    pub fn document_url(&self, document_id: &str) -> String {
        format!(
            "{}/document/{}",
            self.public_base_url.trim_end_matches('/'),
            document_id
        )
    }
}

#[derive(Debug, Clone)]
pub struct SignerConfig {
    pub listen_addr: SocketAddr,
    /// Root of templates/, signatures/, qrcodes/ and signed/
    pub storage_root: PathBuf,
    /// JSON fixture loaded into the in-memory store on start
    pub seed_path: Option<PathBuf>,
    pub worker: WorkerConfig,
    pub retry: RetryPolicy,
    pub pipeline: PipelineConfig,
    pub converter: ConverterConfig,
    pub qr: QrConfig,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            storage_root: PathBuf::from("uploads"),
            seed_path: None,
            worker: WorkerConfig::default(),
            retry: RetryPolicy::default(),
            pipeline: PipelineConfig::default(),
            converter: ConverterConfig::default(),
            qr: QrConfig::default(),
        }
    }
}

impl SignerConfig {
    pub fn new(listen_addr: SocketAddr, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr,
            storage_root: storage_root.into(),
            ..Default::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.worker.concurrency = concurrency;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.pipeline.public_base_url = url.into();
        self
    }
}
