mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{assert_close, open_service, test_service, Traders};
use tradeledger::application::AppError;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_trades_never_overdraw() -> Result<()> {
    let (service, temp) = test_service().await?;
    Traders::alice_and_bob(&service).await?;
    let service = Arc::new(service);

    // 2 x 12 buys of 100 USD against 1000 USD each: exactly 10 per trader succeed
    let mut handles = Vec::new();
    for trader in ["alice", "bob"] {
        for _ in 0..12 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service.buy(trader, 100.0).await
            }));
        }
    }

    let mut committed = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => committed += 1,
            Err(AppError::InsufficientFunds { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }

    assert_eq!(committed, 20);
    assert_eq!(service.chain_len().await, 1 + committed);
    for trader in ["alice", "bob"] {
        let balance = service.balance(trader).await?;
        assert!(balance.usd >= 0.0);
        assert_close(balance.usd, 0.0);
        assert_close(balance.asset, 20.0);
    }
    assert!(service.verify_chain().await.is_healthy());

    // What is on disk matches what was served
    drop(service);
    let reopened = open_service(temp.path()).await?;
    assert_eq!(reopened.chain_len().await, 21);
    assert_close(reopened.balance("alice").await?.asset, 20.0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_price_changes_are_recorded_consistently() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Traders::alice(&service).await?;
    let service = Arc::new(service);

    let refresher = service
        .price_feed()
        .spawn_refresher(std::time::Duration::from_millis(5));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move { service.buy("alice", 10.0).await }));
    }
    for handle in handles {
        handle.await??;
    }
    refresher.shutdown().await;

    // Each block carries the price that was applied to the balances
    let expected_asset: f64 = service
        .history("alice")
        .await?
        .iter()
        .map(|entry| entry.record.asset_quantity())
        .sum();
    let balance = service.balance("alice").await?;
    assert!((balance.asset - expected_asset).abs() < 1e-9);
    assert_close(balance.usd, 900.0);

    Ok(())
}

#[tokio::test]
async fn test_failed_commit_rolls_back_trade() -> Result<()> {
    let (service, temp) = test_service().await?;
    Traders::alice(&service).await?;
    service.buy("alice", 100.0).await?;
    let chain_before = std::fs::read(temp.path().join("blockchain.json"))?;
    let accounts_before = std::fs::read(temp.path().join("users.dat"))?;

    // A directory squatting on the staging path makes the chain write fail
    let blocker = temp.path().join("blockchain.tmp");
    std::fs::create_dir(&blocker)?;

    let result = service.buy("alice", 100.0).await;
    assert!(matches!(result, Err(AppError::Persistence(_))));

    assert_eq!(service.chain_len().await, 2);
    let balance = service.balance("alice").await?;
    assert_close(balance.usd, 900.0);
    assert_close(balance.asset, 2.0);
    assert_eq!(std::fs::read(temp.path().join("blockchain.json"))?, chain_before);
    assert_eq!(std::fs::read(temp.path().join("users.dat"))?, accounts_before);

    // Once the obstruction is gone the same trade goes through
    std::fs::remove_dir(&blocker)?;
    let trade = service.buy("alice", 100.0).await?;
    assert_eq!(trade.block.index(), 2);
    assert_eq!(trade.block.previous_hash(), service.blocks().await[1].hash());

    Ok(())
}

#[tokio::test]
async fn test_failed_account_staging_leaves_chain_file_untouched() -> Result<()> {
    let (service, temp) = test_service().await?;
    Traders::alice(&service).await?;
    let chain_before = std::fs::read(temp.path().join("blockchain.json"))?;

    std::fs::create_dir(temp.path().join("users.tmp"))?;

    assert!(service.buy("alice", 100.0).await.is_err());
    assert!(service.deposit("alice", 1.0).await.is_err());

    assert_eq!(std::fs::read(temp.path().join("blockchain.json"))?, chain_before);
    assert!(!temp.path().join("blockchain.tmp").exists());
    assert_eq!(service.chain_len().await, 1);
    assert_close(service.balance("alice").await?.usd, 1000.0);

    Ok(())
}

#[tokio::test]
async fn test_failed_registration_is_forgotten() -> Result<()> {
    let (service, temp) = test_service().await?;
    std::fs::create_dir(temp.path().join("users.tmp"))?;

    assert!(service.register("alice", "pw").await.is_err());
    assert!(matches!(
        service.balance("alice").await,
        Err(AppError::NotFound(_))
    ));

    std::fs::remove_dir(temp.path().join("users.tmp"))?;
    service.register("alice", "pw").await?;

    Ok(())
}

#[tokio::test]
async fn test_failed_account_rename_restores_chain_file() -> Result<()> {
    let (service, temp) = test_service().await?;
    Traders::alice(&service).await?;
    let chain_path = temp.path().join("blockchain.json");
    let chain_before = std::fs::read(&chain_path)?;

    // Staging succeeds, but nothing can be renamed over a non-empty directory
    let accounts_path = temp.path().join("users.dat");
    std::fs::remove_file(&accounts_path)?;
    std::fs::create_dir(&accounts_path)?;
    std::fs::write(accounts_path.join("occupied"), b"x")?;

    let result = service.buy("alice", 100.0).await;

    assert!(matches!(result, Err(AppError::Persistence(_))));
    assert_eq!(service.chain_len().await, 1);
    assert_close(service.balance("alice").await?.usd, 1000.0);
    assert_eq!(std::fs::read(&chain_path)?, chain_before);
    assert!(!temp.path().join("users.tmp").exists());
    assert!(!temp.path().join("blockchain.tmp").exists());

    // The restored chain file is whole and trading is still open
    assert!(!service.is_halted().await);
    assert!(service.verify_chain().await.is_healthy());

    Ok(())
}
