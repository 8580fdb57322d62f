//! Build-kind detection and Dockerfile generation.
//!
//! A service with a `build` path but no user-authored Dockerfile gets one
//! generated from source-tree heuristics. An existing Dockerfile always
//! wins and is never overwritten.

use std::fmt;
use std::path::Path;

use anyhow::{Result, bail};
use regex::Regex;

/// Detected project flavor of a build directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
    Node,
    React,
    Vue,
    SpringBoot,
    Go,
    Python,
    Unknown,
}

impl fmt::Display for BuildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildKind::Node => "nodejs",
            BuildKind::React => "react",
            BuildKind::Vue => "vue",
            BuildKind::SpringBoot => "springboot",
            BuildKind::Go => "go",
            BuildKind::Python => "python",
            BuildKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Detect the build kind of `<project>/<build_path>` from marker files.
pub fn detect(project_dir: &Path, build_path: &str) -> Result<BuildKind> {
    let dir = project_dir.join(build_path);
    if !dir.exists() {
        bail!("build path does not exist: {}", dir.display());
    }

    if dir.join("package.json").exists() {
        if let Ok(content) = std::fs::read_to_string(dir.join("package.json")) {
            if content.contains("\"react\"") {
                return Ok(BuildKind::React);
            }
            if content.contains("\"vue\"") {
                return Ok(BuildKind::Vue);
            }
        }
        return Ok(BuildKind::Node);
    }

    if dir.join("build.gradle").exists()
        || dir.join("build.gradle.kts").exists()
        || dir.join("pom.xml").exists()
    {
        return Ok(BuildKind::SpringBoot);
    }

    if dir.join("go.mod").exists() {
        return Ok(BuildKind::Go);
    }

    if dir.join("requirements.txt").exists() || dir.join("Pipfile").exists() {
        return Ok(BuildKind::Python);
    }

    Ok(BuildKind::Unknown)
}

/// Version and layout details probed from the build directory.
#[derive(Debug, Clone)]
pub struct ProjectProbe {
    pub node_version: String,
    pub java_version: String,
    pub gradle_version: String,
    /// "gradle" or "maven" when a JVM build file was found.
    pub build_tool: Option<&'static str>,
    pub build_command: String,
    pub output_dir: String,
}

impl Default for ProjectProbe {
    fn default() -> Self {
        Self {
            node_version: "18".to_string(),
            java_version: "17".to_string(),
            gradle_version: "8.5".to_string(),
            build_tool: None,
            build_command: "npm run build".to_string(),
            output_dir: "build".to_string(),
        }
    }
}

/// Probe a build directory for version pins and build-tool specifics.
/// Every lookup is best-effort; unreadable files leave the defaults alone.
pub fn analyze(project_dir: &Path, build_path: &str) -> ProjectProbe {
    let dir = project_dir.join(build_path);
    let mut probe = ProjectProbe::default();

    if let Ok(content) = std::fs::read_to_string(dir.join("package.json")) {
        analyze_package_json(&content, &mut probe);
    }

    for gradle_file in ["build.gradle", "build.gradle.kts"] {
        if let Ok(content) = std::fs::read_to_string(dir.join(gradle_file)) {
            probe.build_tool = Some("gradle");
            analyze_gradle(&content, &mut probe);
        }
    }

    if let Ok(content) = std::fs::read_to_string(dir.join("pom.xml")) {
        probe.build_tool = Some("maven");
        analyze_pom(&content, &mut probe);
    }

    probe
}

fn analyze_package_json(content: &str, probe: &mut ProjectProbe) {
    let Ok(pkg) = serde_json::from_str::<serde_json::Value>(content) else {
        return;
    };

    // engines.node pins the major version: ">=18.0.0" -> "18"
    if let Some(node) = pkg
        .pointer("/engines/node")
        .and_then(|v| v.as_str())
    {
        if let Some(m) = Regex::new(r"(\d+)").unwrap().find(node) {
            probe.node_version = m.as_str().to_string();
        }
    }

    // Always build through npm so node_modules binaries resolve inside the
    // image, regardless of what scripts.build says.
    probe.build_command = "npm run build".to_string();

    let has_dep = |name: &str| {
        pkg.pointer(&format!("/dependencies/{name}")).is_some()
            || pkg.pointer(&format!("/devDependencies/{name}")).is_some()
    };
    if has_dep("vite") {
        probe.output_dir = "dist".to_string();
    } else if has_dep("react-scripts") {
        probe.output_dir = "build".to_string();
    }
}

fn analyze_gradle(content: &str, probe: &mut ProjectProbe) {
    let source_compat = Regex::new(r#"sourceCompatibility\s*=\s*['"]?(\d+)['"]?"#).unwrap();
    if let Some(caps) = source_compat.captures(content) {
        probe.java_version = caps[1].to_string();
    }
    let lang_version = Regex::new(r"JavaLanguageVersion\.of\((\d+)\)").unwrap();
    if let Some(caps) = lang_version.captures(content) {
        probe.java_version = caps[1].to_string();
    }
}

fn analyze_pom(content: &str, probe: &mut ProjectProbe) {
    for pattern in [
        r"<maven\.compiler\.source>(\d+)</maven\.compiler\.source>",
        r"<java\.version>(\d+)</java\.version>",
    ] {
        if let Some(caps) = Regex::new(pattern).unwrap().captures(content) {
            probe.java_version = caps[1].to_string();
        }
    }
}

/// Write a generated Dockerfile into the build directory unless the user
/// already provided one. Returns `true` when a file was written.
pub fn write(project_dir: &Path, build_path: &str, kind: BuildKind) -> Result<bool> {
    let path = project_dir.join(build_path).join("Dockerfile");
    if path.exists() {
        return Ok(false);
    }

    let probe = analyze(project_dir, build_path);
    let content = render(kind, &probe);
    std::fs::write(&path, content)
        .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", path.display()))?;
    Ok(true)
}

/// Render the Dockerfile text for a detected kind.
pub fn render(kind: BuildKind, probe: &ProjectProbe) -> String {
    match kind {
        BuildKind::React => render_spa(probe, "build"),
        BuildKind::Vue => render_spa(probe, "dist"),
        BuildKind::Node => format!(
            r#"FROM node:{node}-alpine
WORKDIR /app

COPY package*.json ./
RUN npm install --production

COPY . .

EXPOSE 3000
CMD ["npm", "start"]
"#,
            node = probe.node_version
        ),
        BuildKind::SpringBoot => {
            if probe.build_tool == Some("maven") {
                render_maven(probe)
            } else {
                render_gradle(probe)
            }
        }
        BuildKind::Go => r#"# Build stage
FROM golang:1.21-alpine AS build
WORKDIR /app

COPY go.mod go.sum ./
RUN go mod download

COPY . .
RUN CGO_ENABLED=0 GOOS=linux go build -o main .

# Production stage
FROM alpine:latest
WORKDIR /root/

COPY --from=build /app/main .

EXPOSE 8080
CMD ["./main"]
"#
        .to_string(),
        BuildKind::Python => r#"FROM python:3.11-slim
WORKDIR /app

COPY requirements.txt ./
RUN pip install --no-cache-dir -r requirements.txt

COPY . .

EXPOSE 8000
CMD ["python", "main.py"]
"#
        .to_string(),
        BuildKind::Unknown => r#"# Generated fallback; customize for your application
FROM alpine:latest
WORKDIR /app

COPY . .

EXPOSE 8080
CMD ["/bin/sh"]
"#
        .to_string(),
    }
}

/// Static single-page apps build with node and serve from nginx.
fn render_spa(probe: &ProjectProbe, default_output: &str) -> String {
    let output = if probe.output_dir.is_empty() {
        default_output
    } else {
        &probe.output_dir
    };
    format!(
        r#"# Build stage
FROM node:{node}-alpine AS build
WORKDIR /app

COPY package*.json ./
RUN npm install

COPY . .
RUN {build_cmd}

# Production stage
FROM nginx:alpine
COPY --from=build /app/{output} /usr/share/nginx/html

EXPOSE 80
CMD ["nginx", "-g", "daemon off;"]
"#,
        node = probe.node_version,
        build_cmd = probe.build_command,
    )
}

fn render_gradle(probe: &ProjectProbe) -> String {
    format!(
        r#"# Build stage
FROM gradle:{gradle}-jdk{java} AS build
WORKDIR /app

COPY . .
RUN gradle build --no-daemon -x test --stacktrace

# Production stage
FROM openjdk:{java}-slim
WORKDIR /app

COPY --from=build /app/build/libs/*.jar app.jar

EXPOSE 8080
ENTRYPOINT ["java", "-jar", "app.jar"]
"#,
        gradle = probe.gradle_version,
        java = probe.java_version,
    )
}

fn render_maven(probe: &ProjectProbe) -> String {
    format!(
        r#"# Build stage
FROM maven:3.9-eclipse-temurin-{java} AS build
WORKDIR /app

COPY pom.xml ./
RUN mvn dependency:go-offline -B

COPY src ./src
RUN mvn clean package -DskipTests

# Production stage
FROM openjdk:{java}-slim
WORKDIR /app

COPY --from=build /app/target/*.jar app.jar

EXPOSE 8080
ENTRYPOINT ["java", "-jar", "app.jar"]
"#,
        java = probe.java_version,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn detects_react_over_plain_node() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("web")).unwrap();
        fs::write(
            dir.path().join("web/package.json"),
            r#"{"dependencies": {"react": "^18.0.0"}}"#,
        )
        .unwrap();
        assert_eq!(detect(dir.path(), "web").unwrap(), BuildKind::React);
    }

    #[test]
    fn detects_go_module() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("api")).unwrap();
        fs::write(dir.path().join("api/go.mod"), "module example.com/api\n").unwrap();
        assert_eq!(detect(dir.path(), "api").unwrap(), BuildKind::Go);
    }

    #[test]
    fn unknown_for_empty_directory() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        assert_eq!(detect(dir.path(), "empty").unwrap(), BuildKind::Unknown);
    }

    #[test]
    fn missing_build_path_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(detect(dir.path(), "nope").is_err());
    }

    #[test]
    fn analyze_extracts_node_engine_major() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("web")).unwrap();
        fs::write(
            dir.path().join("web/package.json"),
            r#"{"engines": {"node": ">=20.1.0"}, "devDependencies": {"vite": "^5"}}"#,
        )
        .unwrap();
        let probe = analyze(dir.path(), "web");
        assert_eq!(probe.node_version, "20");
        assert_eq!(probe.output_dir, "dist");
    }

    #[test]
    fn analyze_extracts_java_version_from_gradle() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("svc")).unwrap();
        fs::write(
            dir.path().join("svc/build.gradle"),
            "sourceCompatibility = '21'\n",
        )
        .unwrap();
        let probe = analyze(dir.path(), "svc");
        assert_eq!(probe.build_tool, Some("gradle"));
        assert_eq!(probe.java_version, "21");
    }

    #[test]
    fn write_respects_existing_dockerfile() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("web")).unwrap();
        fs::write(dir.path().join("web/Dockerfile"), "FROM scratch\n").unwrap();
        let written = write(dir.path(), "web", BuildKind::Node).unwrap();
        assert!(!written);
        let content = fs::read_to_string(dir.path().join("web/Dockerfile")).unwrap();
        assert_eq!(content, "FROM scratch\n");
    }

    #[test]
    fn write_generates_when_absent() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("api")).unwrap();
        let written = write(dir.path(), "api", BuildKind::Go).unwrap();
        assert!(written);
        let content = fs::read_to_string(dir.path().join("api/Dockerfile")).unwrap();
        assert!(content.contains("golang:1.21-alpine"));
    }

    #[test]
    fn maven_projects_render_maven_stages() {
        let probe = ProjectProbe {
            build_tool: Some("maven"),
            java_version: "21".to_string(),
            ..Default::default()
        };
        let content = render(BuildKind::SpringBoot, &probe);
        assert!(content.contains("maven:3.9-eclipse-temurin-21"));
        assert!(content.contains("openjdk:21-slim"));
    }
}
