//! Job specification compiler.
//!
//! The template is rendered into one end of a bounded in-memory pipe while
//! the other end is decoded as YAML into a [`JobSpec`]. Renderer and decoder
//! run as two blocking tasks; the renderer cannot run further ahead of the
//! decoder than the pipe capacity, and the rendered document is never held
//! in memory as a whole.
//!
//! Each side records its failure before releasing its end of the pipe. The
//! first recorded failure wins: a renderer failure closes the pipe and the
//! decoder then sees end-of-stream, a decoder failure drops the reader and
//! the renderer's next write fails with `BrokenPipe`. Neither consequence
//! can replace the original cause.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use kiln_config::template::{self, TEMPLATE_NAME, TemplateContext};
use kiln_core::{JobSpec, TriggerContext};
use thiserror::Error;
use tokio::task;
use tokio_util::io::SyncIoBridge;
use tracing::debug;

/// Default capacity of the render/decode pipe.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("template parse error: {0}")]
    Parse(#[source] minijinja::Error),

    #[error("template render error: {0}")]
    Render(#[source] minijinja::Error),

    #[error("job spec decode error: {0}")]
    Decode(#[from] serde_yaml::Error),

    #[error("pipe error: {0}")]
    Io(#[from] std::io::Error),

    #[error("compilation timed out after {0:?}")]
    Timeout(Duration),

    #[error("compile task failed: {0}")]
    Join(String),
}

/// Compiles job templates into job specifications.
#[derive(Debug, Clone)]
pub struct Compiler {
    pipe_capacity: usize,
    timeout: Option<Duration>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            timeout: None,
        }
    }

    /// Fail compilations that take longer than `timeout`.
    ///
    /// On expiry both tasks are detached; they finish on their own once the
    /// render returns.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    /// Render `template` against `ctx` and decode the result.
    pub async fn compile(
        &self,
        template: &str,
        ctx: &TriggerContext,
    ) -> Result<JobSpec, CompileError> {
        let env = template::parse(template).map_err(CompileError::Parse)?;
        let values = TemplateContext::from(ctx);

        let spec = self
            .render_and_decode(
                move |out| {
                    let tpl = env.get_template(TEMPLATE_NAME).map_err(CompileError::Render)?;
                    tpl.render_captured_to(values, out)
                        .map_err(CompileError::Render)?;
                    Ok(())
                },
                |input| Ok(serde_yaml::from_reader::<_, JobSpec>(input)?),
            )
            .await?;

        debug!(context = %ctx, containers = spec.containers.len(), "Compiled job spec");
        Ok(spec)
    }

    /// Run `render` and `decode` concurrently, connected by a bounded pipe.
    async fn render_and_decode<T, R, D>(&self, render: R, decode: D) -> Result<T, CompileError>
    where
        T: Send + 'static,
        R: FnOnce(&mut dyn Write) -> Result<(), CompileError> + Send + 'static,
        D: FnOnce(&mut dyn Read) -> Result<T, CompileError> + Send + 'static,
    {
        let (writer, reader) = tokio::io::duplex(self.pipe_capacity);
        let mut output = SyncIoBridge::new(writer);
        let mut input = SyncIoBridge::new(reader);
        let failure = Arc::new(FirstFailure::default());

        let producer = {
            let failure = failure.clone();
            task::spawn_blocking(move || {
                if let Err(err) = render(&mut output) {
                    failure.record(err);
                }
                // Closing the writer is the decoder's end-of-stream.
                drop(output);
            })
        };

        let consumer = {
            let failure = failure.clone();
            task::spawn_blocking(move || {
                let decoded = decode(&mut input).map_err(|err| failure.record(err)).ok();
                drop(input);
                decoded
            })
        };

        let joined = async { tokio::join!(producer, consumer) };
        let (produced, consumed) = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, joined)
                .await
                .map_err(|_| CompileError::Timeout(limit))?,
            None => joined.await,
        };

        produced.map_err(|e| CompileError::Join(e.to_string()))?;
        let decoded = consumed.map_err(|e| CompileError::Join(e.to_string()))?;

        if let Some(err) = failure.take() {
            return Err(err);
        }
        decoded.ok_or_else(|| CompileError::Join("decoder finished without a result".to_string()))
    }
}

/// Holds the first failure reported by either side of the pipe.
#[derive(Debug, Default)]
struct FirstFailure(Mutex<Option<CompileError>>);

impl FirstFailure {
    fn record(&self, err: CompileError) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take(&self) -> Option<CompileError> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    const TEMPLATE: &str = r#"
containers:
  - name: build
    image: alpine:3.20
    command: ["/bin/sh", "-c"]
    args:
      - git clone https://github.com/{{ Owner }}/{{ Repo }} /src && cd /src && git checkout {{ Revision }} && make
    env:
      - name: KILN_REVISION
        value: {{ Revision | quote }}
restartPolicy: Never
"#;

    fn ctx() -> TriggerContext {
        TriggerContext::new("acme", "widgets", "refs/heads/main")
    }

    async fn bounded<F: std::future::Future>(fut: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(10), fut)
            .await
            .expect("compilation must not hang")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_compile_embeds_revision() {
        let spec = Compiler::new().compile(TEMPLATE, &ctx()).await.unwrap();

        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        let container = &spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("alpine:3.20"));
        let args = container.args.as_ref().unwrap();
        assert!(args[0].contains("github.com/acme/widgets"));
        assert!(args[0].contains("git checkout refs/heads/main"));
        let env = container.env.as_ref().unwrap();
        assert_eq!(env[0].value.as_deref(), Some("refs/heads/main"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_compile_is_deterministic() {
        let compiler = Compiler::new();
        let first = compiler.compile(TEMPLATE, &ctx()).await.unwrap();
        let second = compiler.compile(TEMPLATE, &ctx()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_json_is_accepted() {
        let template = r#"{"containers": [{"name": "x", "image": "busybox", "args": ["{{ Revision }}"]}]}"#;
        let spec = Compiler::new().compile(template, &ctx()).await.unwrap();
        assert_eq!(spec.containers[0].args.as_ref().unwrap()[0], "refs/heads/main");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_small_pipe_applies_back_pressure() {
        let mut template = String::from("containers:\n  - name: build\n    image: alpine\n    args:\n");
        for i in 0..2000 {
            template.push_str(&format!("      - \"step {} at {{{{ Revision }}}}\"\n", i));
        }

        let spec = bounded(Compiler::new().with_pipe_capacity(16).compile(&template, &ctx()))
            .await
            .unwrap();
        let args = spec.containers[0].args.as_ref().unwrap();
        assert_eq!(args.len(), 2000);
        assert_eq!(args[1999], "step 1999 at refs/heads/main");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_parse_error_is_terminal() {
        let err = Compiler::new().compile("{% for %}", &ctx()).await.unwrap_err();
        assert!(matches!(err, CompileError::Parse(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_render_error_wins_over_truncated_document() {
        let template = "containers:\n  - name: build\n    image: {{ Missing }}\n";
        let err = bounded(Compiler::new().compile(template, &ctx())).await.unwrap_err();
        assert!(matches!(err, CompileError::Render(_)), "got {err}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_decode_error() {
        let err = Compiler::new()
            .compile("containers: {{ Owner }}", &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::Decode(_)), "got {err}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_renderer_does_not_block_decoder() {
        let compiler = Compiler::new();
        let result = bounded(compiler.render_and_decode(
            |_out| Err(CompileError::Io(io::Error::other("render exploded"))),
            |input| {
                let mut buf = Vec::new();
                input.read_to_end(&mut buf)?;
                Err::<(), _>(CompileError::Join(format!("decoder saw {} bytes", buf.len())))
            },
        ))
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("render exploded"), "got {err}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_decoder_does_not_block_renderer() {
        let compiler = Compiler::new().with_pipe_capacity(1024);
        let result = bounded(compiler.render_and_decode(
            |out| {
                let chunk = [b'a'; 8192];
                for _ in 0..1024 {
                    out.write_all(&chunk)?;
                }
                Ok(())
            },
            |_input| Err::<(), _>(CompileError::Io(io::Error::other("decode exploded"))),
        ))
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("decode exploded"), "got {err}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_partial_output_then_render_failure_reports_render() {
        let compiler = Compiler::new();
        let result = bounded(compiler.render_and_decode(
            |out| {
                out.write_all(b"containers: []\n")?;
                Err(CompileError::Io(io::Error::other("render failed midway")))
            },
            |input| Ok(serde_yaml::from_reader::<_, JobSpec>(input)?),
        ))
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("render failed midway"), "got {err}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout() {
        let compiler = Compiler::new().with_timeout(Duration::from_millis(20));
        let result = compiler
            .render_and_decode(
                |_out| {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(())
                },
                |input| {
                    let mut buf = Vec::new();
                    input.read_to_end(&mut buf)?;
                    Ok(buf)
                },
            )
            .await;

        assert!(matches!(result, Err(CompileError::Timeout(_))));
    }
}
