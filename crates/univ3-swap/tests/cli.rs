use assert_cmd::Command;
use predicates::prelude::*;

const WALLET: &str = "0x00000000000000000000000000000000000000aa";
const USDC: &str = "0xA0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
// Well-known local devnet key; never funded on a real chain.
const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
// Nothing listens here, so a test that got as far as the network would fail differently.
const DEAD_RPC: &str = "http://127.0.0.1:1";

/// The binary with a clean environment: no inherited secrets, no stray `.env`,
/// logs in a throwaway directory.
fn swap_cmd(work: &tempfile::TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("univ3-swap"));
    cmd.current_dir(work.path())
        .env("UNIV3_SWAP_DATA_DIR", work.path().join("data"))
        .env_remove("API_URL")
        .env_remove("PRIVATE_KEY")
        .env_remove("ONEINCH_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn swap_args() -> Vec<&'static str> {
    vec![
        "--chain-id",
        "1",
        "--wallet-address",
        WALLET,
        "--token-in-address",
        USDC,
        "--token-out-address",
        WETH,
        "--amount-in",
        "10",
    ]
}

#[test]
fn help_lists_the_swap_flags() -> eyre::Result<()> {
    let work = tempfile::tempdir()?;
    swap_cmd(&work)
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--token-in-address")
                .and(predicate::str::contains("--slippage-bps"))
                .and(predicate::str::contains("--dry-run")),
        );
    Ok(())
}

#[test]
fn missing_required_flags_fail() -> eyre::Result<()> {
    let work = tempfile::tempdir()?;
    swap_cmd(&work)
        .args(["--chain-id", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--wallet-address"));
    Ok(())
}

#[test]
fn missing_api_url_fails_by_name() -> eyre::Result<()> {
    let work = tempfile::tempdir()?;
    swap_cmd(&work)
        .args(swap_args())
        .env("PRIVATE_KEY", DEV_KEY)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("API_URL is not set"));
    Ok(())
}

#[test]
fn missing_private_key_fails_by_name() -> eyre::Result<()> {
    let work = tempfile::tempdir()?;
    swap_cmd(&work)
        .args(swap_args())
        .env("API_URL", DEAD_RPC)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("PRIVATE_KEY is not set"));
    Ok(())
}

#[test]
fn malformed_private_key_is_rejected_without_echoing_it() -> eyre::Result<()> {
    let work = tempfile::tempdir()?;
    swap_cmd(&work)
        .args(swap_args())
        .env("API_URL", DEAD_RPC)
        .env("PRIVATE_KEY", "0xnot-a-key-123")
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("not a valid hex signing key")
                .and(predicate::str::contains("not-a-key-123").not()),
        );
    Ok(())
}

#[test]
fn env_file_in_working_dir_is_loaded() -> eyre::Result<()> {
    let work = tempfile::tempdir()?;
    std::fs::write(work.path().join(".env"), format!("API_URL={DEAD_RPC}\n"))?;
    // API_URL now comes from .env, so the next missing piece is the key.
    swap_cmd(&work)
        .args(swap_args())
        .assert()
        .failure()
        .stderr(predicate::str::contains("PRIVATE_KEY is not set"));
    Ok(())
}

#[test]
fn invalid_address_is_rejected() -> eyre::Result<()> {
    let work = tempfile::tempdir()?;
    swap_cmd(&work)
        .args([
            "--chain-id",
            "1",
            "--wallet-address",
            WALLET,
            "--token-in-address",
            "0x1234",
            "--token-out-address",
            WETH,
            "--amount-in",
            "10",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--token-in-address"));
    Ok(())
}

#[test]
fn unknown_fee_tier_is_rejected() -> eyre::Result<()> {
    let work = tempfile::tempdir()?;
    swap_cmd(&work)
        .args(swap_args())
        .args(["--fee", "2500"])
        .env("API_URL", DEAD_RPC)
        .env("PRIVATE_KEY", DEV_KEY)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a Uniswap V3 fee tier"));
    Ok(())
}

#[test]
fn full_slippage_is_rejected() -> eyre::Result<()> {
    let work = tempfile::tempdir()?;
    swap_cmd(&work)
        .args(swap_args())
        .args(["--slippage-bps", "10000"])
        .env("API_URL", DEAD_RPC)
        .env("PRIVATE_KEY", DEV_KEY)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--slippage-bps 10000 must be below 10000"));
    Ok(())
}

#[test]
fn oneinch_router_needs_an_api_key() -> eyre::Result<()> {
    let work = tempfile::tempdir()?;
    swap_cmd(&work)
        .args(swap_args())
        .args(["--router", "oneinch"])
        .env("API_URL", DEAD_RPC)
        .env("PRIVATE_KEY", DEV_KEY)
        .assert()
        .failure()
        .stderr(predicate::str::contains("ONEINCH_API_KEY is not set"));
    Ok(())
}

#[test]
fn config_file_supplies_the_rpc_url() -> eyre::Result<()> {
    let work = tempfile::tempdir()?;
    let cfg = work.path().join("swap.toml");
    std::fs::write(&cfg, format!("[rpc]\nurl = \"{DEAD_RPC}\"\n"))?;
    swap_cmd(&work)
        .args(swap_args())
        .arg("--config")
        .arg(&cfg)
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("PRIVATE_KEY is not set")
                .and(predicate::str::contains("API_URL").not()),
        );
    Ok(())
}

#[test]
fn unreadable_config_file_fails() -> eyre::Result<()> {
    let work = tempfile::tempdir()?;
    swap_cmd(&work)
        .args(swap_args())
        .args(["--config", "missing.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("read config"));
    Ok(())
}

#[test]
fn zero_amount_is_rejected() -> eyre::Result<()> {
    let work = tempfile::tempdir()?;
    swap_cmd(&work)
        .args([
            "--chain-id",
            "1",
            "--wallet-address",
            WALLET,
            "--token-in-address",
            USDC,
            "--token-out-address",
            WETH,
            "--amount-in",
            "0.00",
        ])
        .env("API_URL", DEAD_RPC)
        .env("PRIVATE_KEY", DEV_KEY)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--amount-in must be greater than zero"));
    Ok(())
}
