use atelier_core::{AtelierResult, Stack};
use std::path::Path;

/// Detect the tech stack of a working copy by probing well-known files.
///
/// Pure function of the directory contents: the same tree always yields the
/// same `Stack`. Later probes override earlier ones the way the original
/// detector did (a tree with both go.mod and package.json reports the node
/// side as primary language).
pub async fn detect_stack(local_path: &Path) -> AtelierResult<Stack> {
    let mut stack = Stack::default();

    if let Ok(content) = tokio::fs::read_to_string(local_path.join("go.mod")).await {
        stack.language = "go".into();
        stack.package_file = "go.mod".into();
        stack.tools.push("go-modules".into());

        stack.framework = if content.contains("gin-gonic") {
            "gin".into()
        } else if content.contains("gorilla/mux") {
            "gorilla".into()
        } else if content.contains("labstack/echo") {
            "echo".into()
        } else {
            "stdlib".into()
        };

        if content.contains("mongo-driver") {
            stack.database = "mongodb".into();
        } else if content.contains("lib/pq") || content.contains("pgx") {
            stack.database = "postgresql".into();
        }
    }

    if let Ok(content) = tokio::fs::read_to_string(local_path.join("package.json")).await {
        stack.language = if content.contains("typescript") {
            "typescript".into()
        } else {
            "javascript".into()
        };
        stack.package_file = "package.json".into();
        stack.tools.push("npm".into());

        if content.contains("next") {
            stack.framework = "nextjs".into();
        } else if content.contains("express") {
            stack.framework = "express".into();
        } else if content.contains("react") {
            stack.framework = "react".into();
        } else if content.contains("vue") {
            stack.framework = "vue".into();
        }
    }

    if path_exists(&local_path.join("pubspec.yaml")).await {
        stack.language = "dart".into();
        stack.framework = "flutter".into();
        stack.package_file = "pubspec.yaml".into();
    }

    if let Ok(content) = tokio::fs::read_to_string(local_path.join("requirements.txt")).await {
        stack.language = "python".into();
        stack.package_file = "requirements.txt".into();

        if content.contains("fastapi") {
            stack.framework = "fastapi".into();
        } else if content.contains("django") {
            stack.framework = "django".into();
        } else if content.contains("flask") {
            stack.framework = "flask".into();
        }
    }

    if path_exists(&local_path.join("Dockerfile")).await {
        stack.tools.push("docker".into());
    }
    if path_exists(&local_path.join("docker-compose.yml")).await {
        stack.tools.push("docker-compose".into());
    }
    if path_exists(&local_path.join(".github").join("workflows")).await {
        stack.tools.push("github-actions".into());
    }

    Ok(stack)
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}
