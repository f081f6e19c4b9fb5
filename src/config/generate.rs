pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGSIFT CONFIGURATION
# =============================================================================
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logsift/config.yml
#   3. /etc/logsift/config.yml
#
# A value may name an environment variable: write $env, then the variable
# name wrapped in curly braces. It is replaced when the file is loaded.

# Default log format for sources that don't set one.
# One of: java, python, go, rust, nginx, syslog, journald, json, generic
format: java

# =============================================================================
# SOURCES
# =============================================================================
sources:
  app:
    type: file
    path: /var/log/app/app.log
    # Where to start when no cursor file matches the current file: end or beginning
    start: end

  journal:
    type: process
    command: journalctl
    args: ["-f", "-o", "short-iso"]
    format: journald

# =============================================================================
# READER
# =============================================================================
reader:
  poll_interval: 250ms
  # Flush a pending multi-line record after the source has been quiet this long
  merge_idle_flush: 1s
  max_record_lines: 500
  # cursor_dir: ~/.local/state/logsift

# =============================================================================
# BATCHING
# =============================================================================
batch:
  max_size: 10
  max_wait: 3s
  channel_capacity: 16

# =============================================================================
# RESULT CACHE
# =============================================================================
cache:
  max_items: 10000
  max_bytes: 67108864
  cleanup_interval: 5m
  ai_ttl: 24h
  rule_ttl: 1h

# =============================================================================
# AI CLASSIFIERS
# =============================================================================
# Endpoints are tried in ascending priority order, round-robin, skipping any
# endpoint that is disabled or over its per-minute rate limit.
ai:
  max_retries: 3
  timeout: 30s
  retry_backoff: 1s
  endpoints:
    - name: primary
      endpoint: https://api.openai.com/v1/chat/completions
      token: $env{LOGSIFT_API_TOKEN}
      model: gpt-4o-mini
      priority: 1
      rate_limit: 60

# =============================================================================
# LOCAL RULES
# =============================================================================
rules:
  use_defaults: true
  files: []
  rules:
    - id: health-check
      name: Health check noise
      pattern: 'GET /health'
      action: filter
      priority: 10
      category: noise

# =============================================================================
# SCHEDULER
# =============================================================================
scheduler:
  min_workers: 1
  max_workers: 8
  initial_workers: 2
  queue_capacity: 256
  worker_queue_size: 1
  # round_robin, least_loaded or random
  strategy: least_loaded
  backpressure_threshold: 128
  scale_interval: 5s
  scale_up_threshold: 0.8
  scale_down_threshold: 0.2
  submit_retry: 500ms

# =============================================================================
# OUTPUT
# =============================================================================
output:
  # stdout or log
  notifier: stdout
"#
    .to_string()
}
