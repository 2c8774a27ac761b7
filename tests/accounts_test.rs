mod common;

use anyhow::Result;
use common::{assert_close, open_service, test_config, test_service, Traders};
use tempfile::TempDir;
use tradeledger::application::{AppError, LedgerService};
use tradeledger::storage::SecretKey;

#[tokio::test]
async fn test_register_grants_starting_balances() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Traders::alice(&service).await?;

    let balance = service.balance("alice").await?;
    assert_eq!(balance.identity, "alice");
    assert_close(balance.usd, 1000.0);
    assert_close(balance.asset, 0.0);

    Ok(())
}

#[tokio::test]
async fn test_custom_starting_balances() -> Result<()> {
    let temp = TempDir::new()?;
    let config = test_config(temp.path()).with_starting_balances(50.0, 3.0);
    let service = LedgerService::open(&config).await?;

    service.register("alice", "pw").await?;
    let balance = service.balance("alice").await?;
    assert_close(balance.usd, 50.0);
    assert_close(balance.asset, 3.0);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Traders::alice(&service).await?;
    service.deposit("alice", 10.0).await?;

    let result = service.register("alice", "other").await;
    assert!(matches!(result, Err(AppError::AlreadyExists(_))));

    // The existing account is untouched
    assert_close(service.balance("alice").await?.usd, 1010.0);
    assert_eq!(service.authenticate("alice", "alice-pw").await?, "alice");

    Ok(())
}

#[tokio::test]
async fn test_empty_identity_or_password_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;

    assert!(matches!(
        service.register("   ", "pw").await,
        Err(AppError::InvalidIdentity(_))
    ));
    assert!(matches!(
        service.register("alice", "").await,
        Err(AppError::InvalidIdentity(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_authentication() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Traders::alice(&service).await?;

    assert_eq!(service.authenticate(" alice ", "alice-pw").await?, "alice");
    assert!(matches!(
        service.authenticate("alice", "wrong").await,
        Err(AppError::InvalidCredentials)
    ));
    assert!(matches!(
        service.authenticate("mallory", "alice-pw").await,
        Err(AppError::InvalidCredentials)
    ));

    Ok(())
}

#[tokio::test]
async fn test_account_file_is_encrypted_and_reloads() -> Result<()> {
    let (service, temp) = test_service().await?;
    Traders::alice_and_bob(&service).await?;
    service.deposit("bob", 123.45).await?;
    drop(service);

    let raw = std::fs::read_to_string(temp.path().join("users.dat"))?;
    assert!(!raw.contains("alice"));
    assert!(!raw.contains("alice-pw"));

    let reopened = open_service(temp.path()).await?;
    assert_close(reopened.balance("bob").await?.usd, 1123.45);
    assert_eq!(reopened.authenticate("alice", "alice-pw").await?, "alice");

    Ok(())
}

#[tokio::test]
async fn test_wrong_key_fails_to_open() -> Result<()> {
    let (service, temp) = test_service().await?;
    Traders::alice(&service).await?;
    drop(service);

    let other_key = SecretKey::from_bytes([7u8; 32]);
    let config = test_config(temp.path()).with_secret_key(other_key);
    let result = LedgerService::open(&config).await;

    assert!(matches!(result, Err(AppError::Decryption(_))));

    Ok(())
}

#[tokio::test]
async fn test_corrupt_account_file_is_not_an_empty_table() -> Result<()> {
    let temp = TempDir::new()?;
    std::fs::write(temp.path().join("users.dat"), "not base64 at all!")?;

    let result = LedgerService::open(&test_config(temp.path())).await;
    assert!(matches!(result, Err(AppError::Decryption(_))));

    Ok(())
}

#[tokio::test]
async fn test_empty_account_file_means_no_accounts() -> Result<()> {
    let temp = TempDir::new()?;
    std::fs::write(temp.path().join("users.dat"), "")?;

    let service = open_service(temp.path()).await?;
    assert!(matches!(
        service.balance("alice").await,
        Err(AppError::NotFound(_))
    ));
    service.register("alice", "pw").await?;

    Ok(())
}

#[tokio::test]
async fn test_reload_picks_up_external_changes() -> Result<()> {
    let (first, temp) = test_service().await?;
    let second = open_service(temp.path()).await?;

    first.register("alice", "pw").await?;
    assert!(second.balance("alice").await.is_err());

    second.reload().await?;
    assert_close(second.balance("alice").await?.usd, 1000.0);

    Ok(())
}

#[tokio::test]
async fn test_overflowing_deposit_is_rejected_and_file_stays_readable() -> Result<()> {
    let (service, temp) = test_service().await?;
    Traders::alice(&service).await?;

    let first = service.deposit("alice", 1.7e308).await?;
    assert!(first.usd.is_finite());

    let result = service.deposit("alice", 1.7e308).await;
    assert!(matches!(result, Err(AppError::InvalidAmount(_))));
    assert_eq!(service.balance("alice").await?.usd, first.usd);
    drop(service);

    let reopened = open_service(temp.path()).await?;
    let balance = reopened.balance("alice").await?;
    assert!(balance.usd.is_finite());
    assert_eq!(balance.usd, first.usd);

    Ok(())
}
