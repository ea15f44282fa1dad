use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "prismgate",
    version,
    about = "幂等的 PR 审查触发网关",
    long_about = "PrismGate：接收 GitHub / Asana webhook 或命令行调用，对同一 PR 保证审查评论至多发布一次。",
    after_long_help = "顶层 COMMAND 可选：\n  serve   启动 webhook 服务\n  invoke  直接对某个 PR 触发审查\n  auth    认证管理\n  ledger  去重账本管理\n  config  配置查看\n\n示例：\n  cargo run -- serve --bind 0.0.0.0:8788\n  cargo run -- invoke acme/widgets#42\n  cargo run -- invoke https://github.com/acme/widgets/pull/42 --instruction \"重试逻辑是否有上限？\""
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "启动 webhook 服务（GitHub 与 Asana）")]
    Serve(ServeArgs),
    #[command(about = "直接触发一次审查，不经过 webhook")]
    Invoke(InvokeArgs),
    #[command(about = "认证管理（保存 Token、查看当前 Token 来源）")]
    Auth(AuthCommand),
    #[command(about = "去重账本管理（查看/释放幂等键）")]
    Ledger(LedgerCommand),
    #[command(about = "配置查看")]
    Config(ConfigCommand),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, help = "监听地址，默认读取配置文件中的 bind")]
    pub bind: Option<String>,
    #[arg(
        long,
        env = "PRISMGATE_GITHUB_WEBHOOK_SECRET",
        hide_env_values = true,
        help = "GitHub webhook 签名密钥（X-Hub-Signature-256）"
    )]
    pub github_webhook_secret: Option<String>,
    #[arg(
        long,
        env = "PRISMGATE_ASANA_WEBHOOK_SECRET",
        hide_env_values = true,
        help = "Asana webhook 签名密钥（X-Hook-Signature），生产环境必须设置"
    )]
    pub asana_webhook_secret: Option<String>,
    #[arg(long, help = "采纳握手请求中的 X-Hook-Secret 作为额外签名密钥（仅在注册 webhook 时开启）")]
    pub adopt_asana_handshake: bool,
    #[arg(long, help = "使用进程内账本（重启后丢失，仅用于调试）")]
    pub ephemeral_ledger: bool,
    #[arg(long, default_value_t = 8, help = "GitHub API 并发上限")]
    pub max_concurrent_api: usize,
}

#[derive(Debug, Args)]
#[command(after_long_help = "示例：\n  cargo run -- invoke acme/widgets#42\n  cargo run -- invoke acme/widgets#42 --comment-id 123456\n  cargo run -- invoke acme/widgets#42 --instruction \"只看并发问题\"")]
pub struct InvokeArgs {
    #[arg(help = "PR 链接或 owner/repo#number")]
    pub pull_request: String,
    #[arg(long, help = "触发评论的 ID；提及标记之后的文本作为指令")]
    pub comment_id: Option<u64>,
    #[arg(long, help = "自由文本指令；存在时只回答该指令")]
    pub instruction: Option<String>,
    #[arg(long, help = "使用进程内账本（不持久化）")]
    pub ephemeral_ledger: bool,
    #[arg(long, default_value_t = 8, help = "GitHub API 并发上限")]
    pub max_concurrent_api: usize,
}

#[derive(Debug, Args)]
#[command(after_long_help = "auth COMMAND 可选：\n  login <token>  保存 GitHub Token\n  which          查看当前生效 Token 来源\n\n示例：\n  cargo run -- auth login ghp_xxx\n  cargo run -- auth which")]
pub struct AuthCommand {
    #[command(subcommand)]
    pub command: AuthSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum AuthSubcommand {
    #[command(about = "登录并保存 GitHub Token 到本地配置")]
    Login { token: String },
    #[command(about = "查看当前生效的 Token 来源（gh/env/本地存储）")]
    Which,
}

#[derive(Debug, Args)]
#[command(after_long_help = "ledger COMMAND 可选：\n  status <key>   查看幂等键状态\n  release <key>  释放处于 admitted 状态的键（进程崩溃后使用）\n\n示例：\n  cargo run -- ledger status github-review:acme/widgets#42\n  cargo run -- ledger release asana-task:1200")]
pub struct LedgerCommand {
    #[command(subcommand)]
    pub command: LedgerSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum LedgerSubcommand {
    #[command(about = "查看幂等键状态")]
    Status { key: String },
    #[command(about = "释放处于 admitted 状态的幂等键；committed 键不会被删除")]
    Release { key: String },
}

#[derive(Debug, Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigSubcommand {
    #[command(about = "打印当前生效配置（JSON）")]
    Show,
    #[command(about = "打印配置文件路径")]
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_parses_reference_and_options() {
        let cli = Cli::try_parse_from([
            "prismgate",
            "invoke",
            "acme/widgets#42",
            "--comment-id",
            "77",
        ])
        .expect("parse");
        let Commands::Invoke(args) = cli.command else {
            panic!("expected invoke");
        };
        assert_eq!(args.pull_request, "acme/widgets#42");
        assert_eq!(args.comment_id, Some(77));
        assert!(!args.ephemeral_ledger);
    }

    #[test]
    fn ledger_release_requires_key() {
        assert!(Cli::try_parse_from(["prismgate", "ledger", "release"]).is_err());
        let cli = Cli::try_parse_from(["prismgate", "ledger", "release", "asana-task:1"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Ledger(LedgerCommand {
                command: LedgerSubcommand::Release { .. }
            })
        ));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
