//! The non-interactive renderer: formats one log entry into one styled
//! terminal line (SPEC_FULL §4.6).

use std::io::Write;
use std::sync::Arc;

use termcolor::{Color, ColorSpec, StandardStream, WriteColor};

use crate::color::ColorAssigner;
use crate::model::LogEntry;
use crate::render::json;
use crate::render::registry::{prefix_text, AlignmentRegistry};
use crate::render::Renderer;

/// Snapshot (non-TUI) implementation of the render interface. Deterministic
/// and synchronous: the only I/O it performs is writing the formatted line
/// to `out` (or a warning/error line to `err`). Generic over the output
/// writer so tests can swap `StandardStream` for an in-memory
/// `termcolor::Buffer` and assert on the exact bytes produced.
pub struct SnapshotRenderer<W: WriteColor + Write = StandardStream> {
    out: W,
    err: W,
    registry: Arc<AlignmentRegistry>,
    colors: Arc<ColorAssigner>,
    color_logs: bool,
}

impl SnapshotRenderer<StandardStream> {
    pub fn new(
        registry: Arc<AlignmentRegistry>,
        colors: Arc<ColorAssigner>,
        color_logs: bool,
    ) -> SnapshotRenderer<StandardStream> {
        let choice = if color_logs {
            termcolor::ColorChoice::Always
        } else {
            termcolor::ColorChoice::Never
        };
        SnapshotRenderer {
            out: StandardStream::stdout(choice),
            err: StandardStream::stderr(choice),
            registry,
            colors,
            color_logs,
        }
    }
}

impl<W: WriteColor + Write> SnapshotRenderer<W> {
    fn write_plain(&mut self, stream: Stream, text: &str) {
        let target = match stream {
            Stream::Out => &mut self.out,
            Stream::Err => &mut self.err,
        };
        let _ = target.set_color(&ColorSpec::new());
        let _ = write!(target, "{text}");
    }

    fn write_colored(&mut self, stream: Stream, text: &str, color: Color, dim: bool) {
        if !self.color_logs {
            self.write_plain(stream, text);
            return;
        }
        let target = match stream {
            Stream::Out => &mut self.out,
            Stream::Err => &mut self.err,
        };
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(color));
        spec.set_dimmed(dim);
        let _ = target.set_color(&spec);
        let _ = write!(target, "{text}");
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Out,
    Err,
}

impl<W: WriteColor + Write + Send> Renderer for SnapshotRenderer<W> {
    fn render(&mut self, entry: &LogEntry) {
        let namespace = &entry.container.namespace;
        let pod_name = &entry.container.pod_name;
        let show_ns = self.registry.show_namespace();
        let show_container = self.registry.container_count(namespace, pod_name) > 1;
        let pod_color = self.colors.get(pod_name);

        let timestamp_text = entry
            .timestamp
            .map(|ts| format!("{} ", ts.format("%Y-%m-%dT%H:%M:%S%.6fZ")))
            .unwrap_or_default();
        let plain_prefix = prefix_text(show_ns, namespace, pod_name, show_container, &entry.container.container_name);

        let rendered_len = timestamp_text.len() + plain_prefix.len();
        let pad = self.registry.width().saturating_sub(rendered_len);
        let padding = " ".repeat(pad);

        if !timestamp_text.is_empty() {
            self.write_colored(Stream::Out, &timestamp_text, Color::Ansi256(8), true);
        }
        self.write_plain(Stream::Out, &padding);
        self.write_colored(Stream::Out, &plain_prefix, pod_color, false);
        self.write_plain(Stream::Out, " > ");

        match json::parse(&entry.raw_text) {
            Some(parsed) => {
                if let Some(level) = parsed.level {
                    self.write_colored(Stream::Out, &format!("[{}] ", level.tag()), level.color(), false);
                }
                self.write_colored(Stream::Out, &parsed.message, pod_color, false);
                if !parsed.extra.is_empty() {
                    let meta: String = parsed
                        .extra
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect::<Vec<_>>()
                        .join(" ");
                    self.write_colored(Stream::Out, &format!("  {meta}"), Color::Ansi256(8), true);
                }
            }
            None => {
                self.write_colored(Stream::Out, &entry.raw_text, pod_color, false);
            }
        }
        self.write_plain(Stream::Out, "\n");
        let _ = self.out.flush();
    }

    fn warn(&mut self, text: &str) {
        self.write_colored(Stream::Err, "[warn] ", Color::Yellow, false);
        self.write_plain(Stream::Err, text);
        self.write_plain(Stream::Err, "\n");
        let _ = self.err.flush();
    }

    fn error(&mut self, text: &str) {
        self.write_colored(Stream::Err, "[error] ", Color::Red, false);
        self.write_plain(Stream::Err, text);
        self.write_plain(Stream::Err, "\n");
        let _ = self.err.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContainerIdentity, ContainerKind, RunConfig};

    fn cfg(namespaces: Vec<&str>, timestamps: bool) -> RunConfig {
        RunConfig {
            namespaces: namespaces.into_iter().map(String::from).collect(),
            label_selector: None,
            include: vec![],
            exclude: vec![],
            exclude_init: false,
            exclude_ephemeral: false,
            since_seconds: 600,
            tail_lines: 25,
            follow: false,
            max_containers: 10,
            color_logs: false,
            timestamps,
            verbosity: 0,
            kubeconfig: None,
        }
    }

    fn container(ns: &str, pod: &str, name: &str) -> ContainerIdentity {
        ContainerIdentity {
            namespace: ns.to_string(),
            pod_name: pod.to_string(),
            pod_uid: "uid".to_string(),
            container_name: name.to_string(),
            kind: ContainerKind::Main,
        }
    }

    fn renderer_for(
        registry: Arc<AlignmentRegistry>,
        colors: Arc<ColorAssigner>,
    ) -> SnapshotRenderer<termcolor::Buffer> {
        SnapshotRenderer {
            out: termcolor::Buffer::no_color(),
            err: termcolor::Buffer::no_color(),
            registry,
            colors,
            color_logs: false,
        }
    }

    fn out_text(renderer: &SnapshotRenderer<termcolor::Buffer>) -> String {
        String::from_utf8(renderer.out.as_slice().to_vec()).unwrap()
    }

    /// S1 — snapshot, single namespace, single-container pod: `[NS]` and
    /// `(CONTAINER)` are both omitted.
    #[test]
    fn s1_single_namespace_single_container_omits_prefix_decorations() {
        let cfg = cfg(vec!["default"], false);
        let registry = Arc::new(AlignmentRegistry::new(&cfg, 1));
        let pod = crate::model::PodRecord {
            namespace: "default".to_string(),
            name: "web".to_string(),
            uid: "u1".to_string(),
            labels: Default::default(),
            phase: "Running".to_string(),
            containers: vec![container("default", "web", "nginx")],
        };
        registry.register_pod(&pod);
        let colors = Arc::new(ColorAssigner::new());
        let mut renderer = renderer_for(registry, colors);

        renderer.render(&LogEntry {
            container: container("default", "web", "nginx"),
            raw_text: "hello".to_string(),
            timestamp: None,
        });
        renderer.render(&LogEntry {
            container: container("default", "web", "nginx"),
            raw_text: "world".to_string(),
            timestamp: None,
        });

        assert_eq!(out_text(&renderer), "web > hello\nweb > world\n");
    }

    /// S2 — snapshot, multi-namespace: `[NS]` stays, both prefixes pad to
    /// the same width.
    #[test]
    fn s2_multi_namespace_prefixes_are_equal_width() {
        let cfg = cfg(vec!["a", "b"], false);
        let registry = Arc::new(AlignmentRegistry::new(&cfg, 2));
        for (ns, pod) in [("a", "p1"), ("b", "p2")] {
            registry.register_pod(&crate::model::PodRecord {
                namespace: ns.to_string(),
                name: pod.to_string(),
                uid: "u".to_string(),
                labels: Default::default(),
                phase: "Running".to_string(),
                containers: vec![container(ns, pod, "app")],
            });
        }
        let colors = Arc::new(ColorAssigner::new());
        let mut renderer = renderer_for(registry, colors);

        renderer.render(&LogEntry {
            container: container("a", "p1", "app"),
            raw_text: "x".to_string(),
            timestamp: None,
        });
        renderer.render(&LogEntry {
            container: container("b", "p2", "app"),
            raw_text: "y".to_string(),
            timestamp: None,
        });

        let text = out_text(&renderer);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "[a] p1 > x");
        let prefix_len = |l: &str| l.split(" > ").next().unwrap().len();
        assert_eq!(prefix_len(lines[0]), prefix_len(lines[1]));
    }

    /// S3 — JSON intelligence: level/message extraction, extra fields
    /// dimmed in source order.
    #[test]
    fn s3_json_line_extracts_level_message_and_fields() {
        let cfg = cfg(vec!["default"], false);
        let registry = Arc::new(AlignmentRegistry::new(&cfg, 1));
        registry.register_pod(&crate::model::PodRecord {
            namespace: "default".to_string(),
            name: "web".to_string(),
            uid: "u1".to_string(),
            labels: Default::default(),
            phase: "Running".to_string(),
            containers: vec![container("default", "web", "nginx")],
        });
        let colors = Arc::new(ColorAssigner::new());
        let mut renderer = renderer_for(registry, colors);

        renderer.render(&LogEntry {
            container: container("default", "web", "nginx"),
            raw_text: r#"{"level":"INFO","msg":"Request received","path":"/api/users","method":"GET"}"#.to_string(),
            timestamp: None,
        });

        assert_eq!(
            out_text(&renderer),
            "web > [INFO] Request received  path=/api/users method=GET\n"
        );
    }

    /// Invariant 7 — rendering the same entry twice produces identical bytes.
    #[test]
    fn rendering_is_idempotent() {
        let cfg = cfg(vec!["default"], false);
        let registry = Arc::new(AlignmentRegistry::new(&cfg, 1));
        registry.register_pod(&crate::model::PodRecord {
            namespace: "default".to_string(),
            name: "web".to_string(),
            uid: "u1".to_string(),
            labels: Default::default(),
            phase: "Running".to_string(),
            containers: vec![container("default", "web", "nginx")],
        });
        let colors = Arc::new(ColorAssigner::new());
        let entry = LogEntry {
            container: container("default", "web", "nginx"),
            raw_text: "plain line".to_string(),
            timestamp: None,
        };

        let mut first = renderer_for(registry.clone(), colors.clone());
        first.render(&entry);
        let mut second = renderer_for(registry, colors);
        second.render(&entry);

        assert_eq!(out_text(&first), out_text(&second));
    }
}
