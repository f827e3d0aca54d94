//! End-to-end runs of the line loop with in-memory input and output.

use chatroom_cli::input::InputFormat;
use chatroom_cli::topics::{Candidate, NOBODY_REPLY};
use chatroom_cli::{build_router, run, RunOptions, RunSummary};
use chatroom_core::RouterConfig;
use tokio::io::{AsyncReadExt, BufReader};

const AUTH_URL: &str = "https://example.com/auth";

fn options(format: InputFormat, candidates: Vec<Candidate>) -> RunOptions {
    RunOptions {
        format,
        ignore_user: Some("slackbot".to_string()),
        auth_url: AUTH_URL.to_string(),
        candidates,
    }
}

async fn run_lines(input: &str, options: RunOptions) -> (RunSummary, Vec<String>) {
    let router = build_router(&options, &RouterConfig::default()).unwrap();
    let (writer, mut reader) = tokio::io::duplex(64 * 1024);
    let input = BufReader::new(input.as_bytes());

    let summary = run(router, input, writer, &options).await.unwrap();

    let mut output = String::new();
    reader.read_to_string(&mut output).await.unwrap();
    (summary, output.lines().map(str::to_string).collect())
}

#[tokio::test]
async fn test_run_text_input() {
    let candidates = vec![Candidate {
        venue: "Soba Ni".to_string(),
        first_name: "Hanako".to_string(),
        last_name: "Sato".to_string(),
        area: None,
    }];
    let input = "get\nごはんルーレット\n\nhello\nご飯ルーレット 渋谷\n";

    let (summary, replies) = run_lines(input, options(InputFormat::Text, candidates)).await;

    assert_eq!(summary, RunSummary { routed: 4, ignored: 0 });
    assert_eq!(
        replies,
        vec![
            AUTH_URL.to_string(),
            "Soba Ni (by Hanako Sato)".to_string(),
            "Soba Ni (by Hanako Sato)".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_run_json_input_ignores_bot_user() {
    let input = concat!(
        r#"{"user_name":"alice","text":"get"}"#,
        "\n",
        r#"{"user_name":"slackbot","text":"get"}"#,
        "\n",
        "not json\n",
        r#"{"user_name":"bob","text":"ごはんルーレット"}"#,
        "\n",
    );

    let (summary, replies) = run_lines(input, options(InputFormat::Json, Vec::new())).await;

    assert_eq!(summary, RunSummary { routed: 2, ignored: 1 });
    assert_eq!(replies, vec![AUTH_URL.to_string(), NOBODY_REPLY.to_string()]);
}

#[tokio::test]
async fn test_run_empty_input() {
    let (summary, replies) = run_lines("", options(InputFormat::Text, Vec::new())).await;
    assert_eq!(summary, RunSummary::default());
    assert!(replies.is_empty());
}
