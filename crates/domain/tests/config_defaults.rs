use tern_domain::config::{Config, TransportKind};

#[test]
fn out_of_the_box_server_binds_loopback() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 4810);
    assert!(config.server.rate_limit.is_none());
}

#[test]
fn host_and_port_can_be_widened() {
    let config: Config = toml::from_str(
        r#"
[server]
host = "0.0.0.0"
port = 8080
"#,
    )
    .unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 8080);
}

#[test]
fn cors_defaults_cover_both_loopback_spellings() {
    let origins = &Config::default().server.cors.allowed_origins;
    assert_eq!(origins.len(), 2);
    for origin in ["http://localhost:*", "http://127.0.0.1:*"] {
        assert!(origins.iter().any(|o| o == origin), "missing {origin}");
    }
}

#[test]
fn cors_origin_list_parses_verbatim() {
    let config: Config = toml::from_str(
        r#"
[server.cors]
allowed_origins = ["https://chat.example.org", "http://10.0.0.5:*"]
"#,
    )
    .unwrap();
    let origins = &config.server.cors.allowed_origins;
    assert_eq!(origins[0], "https://chat.example.org");
    // The any-port suffix survives parsing; expansion happens at router build.
    assert_eq!(origins[1], "http://10.0.0.5:*");
}

#[test]
fn empty_toml_produces_full_default_tree() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.engine.max_iterations, 12);
    assert_eq!(config.engine.tool_parallelism, 4);
    assert!(config.engine.include_reasoning);
    assert!(config.llm.transports.is_empty());
    assert!(config.mcp.servers.is_empty());
    assert!(!config.tools.exec.enabled);
}

#[test]
fn representative_config_file_parses_and_validates() {
    let config: Config = toml::from_str(
        r#"
[server]
host = "0.0.0.0"
port = 8080

[server.rate_limit]
requests_per_second = 25
burst_size = 50

[llm]
default_transport = "main"

[[llm.transports]]
id = "main"
kind = "anthropic"
model = "claude-sonnet-4-0"
max_tokens = 2048

[engine]
max_iterations = 6
tool_timeout_secs = 15

[tools.web_search]
base_url = "http://localhost:8888"

[sessions]
state_path = "/tmp/tern-state"

[observability]
otlp_endpoint = "http://localhost:4317"

[[mcp.servers]]
id = "files"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem"]
"#,
    )
    .unwrap();

    assert_eq!(config.server.rate_limit.as_ref().unwrap().burst_size, 50);
    assert_eq!(config.llm.transports[0].kind, TransportKind::Anthropic);
    assert_eq!(config.llm.transports[0].max_tokens, 2048);
    assert_eq!(config.engine.max_iterations, 6);
    assert_eq!(
        config.tools.web_search.base_url.as_deref(),
        Some("http://localhost:8888")
    );
    assert_eq!(config.mcp.servers[0].id, "files");
    assert!(config.is_valid());
}

#[test]
fn findings_carry_dotted_field_paths() {
    let config: Config = toml::from_str(
        r#"
[[llm.transports]]
id = "main"
model = ""
"#,
    )
    .unwrap();

    let findings = config.validate();
    assert!(findings
        .iter()
        .any(|e| e.field == "llm.transports.main.model"));
    assert!(!config.is_valid());
}
