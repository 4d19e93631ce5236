//! API routes.

pub mod health;
pub mod jobs;
pub mod webhooks;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .nest("/webhooks", webhooks::router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::response::Response;
    use kiln_config::{CONFIG_PATH, ConfigRules};
    use kiln_core::executor::{Executor, StartOptions};
    use kiln_core::{Annotations, JobSpec};
    use kiln_pipeline::{Dispatcher, Pipeline, StaticFiles, StatusBroker, TracingSink};
    use kiln_store::{MemoryJobStore, MemoryLogStore};

    use crate::AppState;

    /// Records started jobs instead of running them.
    #[derive(Default)]
    pub struct RecordingExecutor {
        pub started: Mutex<Vec<(JobSpec, Annotations)>>,
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn start(&self, spec: JobSpec, options: StartOptions) -> kiln_core::Result<String> {
            let mut started = self.started.lock().unwrap();
            started.push((spec, options.annotations));
            Ok(format!("kiln-{}", started.len()))
        }
    }

    pub struct TestApp {
        pub state: AppState,
        pub executor: Arc<RecordingExecutor>,
        pub jobs: Arc<MemoryJobStore>,
        pub logs: Arc<MemoryLogStore>,
    }

    /// State over in-memory stores, a recording executor and a repository
    /// whose every revision holds the same config and template.
    pub fn app() -> TestApp {
        let executor = Arc::new(RecordingExecutor::default());
        let jobs = Arc::new(MemoryJobStore::new());
        let logs = Arc::new(MemoryLogStore::new());
        let broker = Arc::new(StatusBroker::new());
        let content = StaticFiles::new()
            .with_file(CONFIG_PATH, "defaultTemplatePath: build.yaml.tpl\n")
            .with_file(
                "build.yaml.tpl",
                "containers:\n  - name: build\n    image: alpine\n    args: [\"{{ Revision }}\"]\n",
            );
        let pipeline = Arc::new(Pipeline::new(executor.clone(), Arc::new(ConfigRules)));
        let dispatcher = Arc::new(Dispatcher::new(
            pipeline,
            Arc::new(content),
            Arc::new(TracingSink),
        ));

        TestApp {
            state: AppState::new(jobs.clone(), logs.clone(), broker, dispatcher),
            executor,
            jobs,
            logs,
        }
    }

    pub async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}
