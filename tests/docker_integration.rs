//! Container provider tests against a live Docker daemon.
//!
//! Run with `cargo test -- --ignored` on a host with Docker available.

use std::fs;
use std::sync::Mutex;

use async_trait::async_trait;
use bollard::Docker;
use tempfile::TempDir;

use skill_forge::runner::{Agent, AgentError, CommandRunner, Evaluation, RunConfig, TrialStatus};
use skill_forge::sandbox::{DockerClient, DockerProvider, DockerProviderConfig, Workspace};
use skill_forge::task::{GraderConfig, Task, TaskConfig};

/// Agent that checks the trial image exists while the trial runs.
struct ImageWitness {
    docker: Docker,
    seen: Mutex<Vec<(String, bool)>>,
}

#[async_trait]
impl Agent for ImageWitness {
    fn name(&self) -> &str {
        "image-witness"
    }

    async fn run(
        &self,
        _instruction: &str,
        workspace: &Workspace,
        _runner: &dyn CommandRunner,
    ) -> Result<String, AgentError> {
        let image = workspace
            .image
            .clone()
            .ok_or_else(|| AgentError::ExecutionFailed("workspace has no image".to_string()))?;
        let exists = self.docker.inspect_image(&image).await.is_ok();
        self.seen.lock().unwrap().push((image, exists));
        Ok(String::new())
    }
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_prepared_image_lifecycle() {
    let temp = TempDir::new().unwrap();
    let task_root = temp.path().join("task");
    fs::create_dir_all(task_root.join("environment")).unwrap();
    fs::write(
        task_root.join("environment/Dockerfile"),
        "FROM alpine:3.19\nWORKDIR /app\n",
    )
    .unwrap();

    let skill = temp.path().join("skills").join("pdf");
    fs::create_dir_all(&skill).unwrap();
    fs::write(skill.join("SKILL.md"), "# PDF skill\n").unwrap();

    let mut config = TaskConfig::default();
    config.agent.timeout_sec = 120;
    config.graders = vec![GraderConfig::deterministic(
        "test -f /root/.claude/skills/pdf/SKILL.md && test -f /root/.agents/skills/pdf/SKILL.md",
        1.0,
    )];
    let task = Task::new("docker-lifecycle", &task_root, "Check the skills", config);

    let docker = Docker::connect_with_local_defaults().unwrap();
    let provider = DockerProvider::with_client(
        DockerClient::from_docker(docker.clone()),
        DockerProviderConfig::default(),
    );
    let agent = ImageWitness {
        docker: docker.clone(),
        seen: Mutex::new(Vec::new()),
    };
    let run = RunConfig::new()
        .with_trials(3)
        .with_parallel(2)
        .with_skill(&skill)
        .without_persistence();

    let outcome = Evaluation::new(task, run).run(&provider, &agent).await;

    let report = outcome.report;
    for trial in &report.trials {
        assert_eq!(trial.status, TrialStatus::Completed, "{:?}", trial.error);
    }
    assert_eq!(report.pass_rate, 1.0);

    let seen = agent.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|(_, exists)| *exists));
    let image = seen[0].0.clone();
    assert!(seen.iter().all(|(name, _)| *name == image));

    // Evaluation::run shuts the provider down, which drops the last reference.
    assert!(provider.image_refs().pinned().is_empty());
    assert_eq!(provider.image_refs().get(&image), 0);
    assert!(docker.inspect_image(&image).await.is_err());
}
