use std::{ffi::OsStr, path::Path, process::Stdio, time::Duration};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::{process::Command, time};

use crate::config::ToolCommand;

pub const INFO_TIMEOUT: Duration = Duration::from_secs(10);
pub const TOPIC_LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// What could be learned about a bag from the info tool. Anything the
/// tool did not report stays empty or zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BagInfo {
    pub topics: Vec<String>,
    pub duration_text: String,
    pub message_count: u64,
}

#[async_trait]
pub trait BagInspector: Send + Sync {
    /// Never fails; an unreadable bag yields `BagInfo::default()`.
    async fn inspect(&self, bag: &Path) -> BagInfo;
}

/// Scrapes `ros2 bag info <bag>`.
pub struct Ros2BagInfo {
    tool: ToolCommand,
    timeout: Duration,
}

impl Ros2BagInfo {
    pub fn new(tool: ToolCommand) -> Self {
        Self {
            tool,
            timeout: INFO_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl BagInspector for Ros2BagInfo {
    async fn inspect(&self, bag: &Path) -> BagInfo {
        let command = self
            .tool
            .command([OsStr::new("bag"), OsStr::new("info"), bag.as_os_str()]);

        match run_captured(command, self.timeout).await {
            Ok(stdout) => parse_bag_info(&stdout),
            Err(reason) => {
                warn!("bag info for {} unavailable: {reason}", bag.display());
                BagInfo::default()
            }
        }
    }
}

/// Lists the topics currently advertised on the ROS graph. Empty when the
/// tool is missing or fails.
pub async fn list_topics(tool: &ToolCommand, timeout: Duration) -> Vec<String> {
    let command = tool.command(["topic", "list"]);
    match run_captured(command, timeout).await {
        Ok(stdout) => stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(reason) => {
            warn!("topic list unavailable: {reason}");
            Vec::new()
        }
    }
}

/// Runs `command` to completion and returns its stdout. The child is
/// killed if it outlives `timeout`.
async fn run_captured(mut command: Command, timeout: Duration) -> Result<String, String> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match time::timeout(timeout, command.output()).await {
        Err(_) => return Err(format!("timed out after {timeout:?}")),
        Ok(Err(err)) => return Err(err.to_string()),
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("exited with {}: {}", output.status, stderr.trim()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Best-effort scrape of the human-readable `ros2 bag info` report.
pub fn parse_bag_info(text: &str) -> BagInfo {
    let mut info = BagInfo::default();

    for line in text.lines() {
        if let Some(index) = line.rfind("Topic:") {
            let rest = &line[index + "Topic:".len()..];
            if let Some((name, _)) = rest.split_once('|') {
                let name = name.trim();
                if !name.is_empty() {
                    info.topics.push(name.to_string());
                }
            }
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "Duration" => info.duration_text = value.trim().to_string(),
            "Messages" => match leading_integer(value) {
                Some(count) => info.message_count = count,
                None => debug!("unparsable message count: {line}"),
            },
            _ => {}
        }
    }

    info
}

fn leading_integer(value: &str) -> Option<u64> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HUMBLE_REPORT: &str = "\
Files:             run1_0.db3
Bag size:          1.4 MiB
Storage id:        sqlite3
Duration:          12.504s
Start:             Mar  7 2024 09:05:01.120 (1709802301.120)
End:               Mar  7 2024 09:05:13.624 (1709802313.624)
Messages:          1893
Topic information: Topic: /imu | Type: sensor_msgs/msg/Imu | Count: 1250 | Serialization Format: cdr
                   Topic: /odom | Type: nav_msgs/msg/Odometry | Count: 625 | Serialization Format: cdr
                   Topic: /tf_static | Type: tf2_msgs/msg/TFMessage | Count: 18 | Serialization Format: cdr
";

    #[test]
    fn parses_topics_duration_and_messages() {
        let info = parse_bag_info(HUMBLE_REPORT);
        assert_eq!(info.topics, ["/imu", "/odom", "/tf_static"]);
        assert_eq!(info.duration_text, "12.504s");
        assert_eq!(info.message_count, 1893);
    }

    #[test]
    fn unexpected_text_yields_defaults() {
        assert_eq!(parse_bag_info(""), BagInfo::default());
        assert_eq!(
            parse_bag_info("Messages: lots\nTopic: dangling\nrandom noise"),
            BagInfo::default()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn inspector_scrapes_tool_output() {
        let script = "printf 'Duration: 3.0s\\nMessages: 7\\nTopic: /scan | Type: x\\n'";
        let inspector = Ros2BagInfo::new(ToolCommand::new("sh").with_args(["-c", script, "ros2"]));

        let info = inspector.inspect(Path::new("/data/bagA")).await;
        assert_eq!(info.topics, ["/scan"]);
        assert_eq!(info.duration_text, "3.0s");
        assert_eq!(info.message_count, 7);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_or_slow_tool_degrades_to_defaults() {
        let missing = Ros2BagInfo::new(ToolCommand::new("/nonexistent/ros2"));
        assert_eq!(missing.inspect(Path::new("/x")).await, BagInfo::default());

        let failing = Ros2BagInfo::new(
            ToolCommand::new("sh").with_args(["-c", "echo 'Messages: 9'; exit 3", "ros2"]),
        );
        assert_eq!(failing.inspect(Path::new("/x")).await, BagInfo::default());

        let slow = Ros2BagInfo::new(ToolCommand::new("sh").with_args(["-c", "exec sleep 5", "ros2"]))
            .with_timeout(Duration::from_millis(200));
        let begun = std::time::Instant::now();
        assert_eq!(slow.inspect(Path::new("/x")).await, BagInfo::default());
        assert!(begun.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn topic_list_skips_blank_lines() {
        let tool = ToolCommand::new("sh").with_args(["-c", "printf '/a\\n\\n /b \\n'", "ros2"]);
        assert_eq!(list_topics(&tool, TOPIC_LIST_TIMEOUT).await, ["/a", "/b"]);
    }
}
