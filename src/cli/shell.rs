use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::application::{AppError, LedgerService};
use crate::domain::{format_asset, format_usd, parse_amount};

type Input = Lines<BufReader<Stdin>>;

/// Menu-driven session on stdin. Rejected requests are reported and the
/// session continues; it ends on `quit` or end of input.
pub async fn run(service: &LedgerService) -> Result<()> {
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!();
        println!("1) Register");
        println!("2) Login");
        println!("3) Quit");
        let Some(choice) = prompt(&mut input, "> ").await? else {
            return Ok(());
        };

        match choice.as_str() {
            "1" | "register" => {
                let Some((user, password)) = ask_credentials(&mut input).await? else {
                    return Ok(());
                };
                match service.register(&user, &password).await {
                    Ok(()) => println!("Registered {}", user.trim()),
                    Err(e) => report(&e),
                }
            }
            "2" | "login" => {
                let Some((user, password)) = ask_credentials(&mut input).await? else {
                    return Ok(());
                };
                match service.authenticate(&user, &password).await {
                    Ok(identity) => {
                        if !user_session(service, &identity, &mut input).await? {
                            return Ok(());
                        }
                    }
                    Err(e) => report(&e),
                }
            }
            "3" | "quit" | "exit" => return Ok(()),
            "" => {}
            other => println!("Unknown option: {}", other),
        }
    }
}

/// Returns `false` when input ended during the session.
async fn user_session(service: &LedgerService, identity: &str, input: &mut Input) -> Result<bool> {
    println!("Welcome, {}", identity);

    loop {
        println!();
        println!("1) Balance   2) Market   3) Deposit   4) Withdraw");
        println!("5) Buy       6) Sell     7) History   8) Logout");
        let Some(choice) = prompt(input, &format!("{}> ", identity)).await? else {
            return Ok(false);
        };

        match choice.as_str() {
            "1" | "balance" => match service.balance(identity).await {
                Ok(balance) => {
                    println!("USD:   {}", format_usd(balance.usd));
                    println!("Asset: {}", format_asset(balance.asset));
                }
                Err(e) => report(&e),
            },
            "2" | "market" => println!("Current price: {} USD", format_usd(service.market())),
            "3" | "deposit" => {
                let Some(amount) = ask_amount(input, "USD to deposit: ").await? else {
                    return Ok(false);
                };
                if let Some(amount) = amount {
                    match service.deposit(identity, amount).await {
                        Ok(balance) => println!("Balance: {} USD", format_usd(balance.usd)),
                        Err(e) => report(&e),
                    }
                }
            }
            "4" | "withdraw" => {
                let Some(amount) = ask_amount(input, "USD to withdraw: ").await? else {
                    return Ok(false);
                };
                if let Some(amount) = amount {
                    match service.withdraw(identity, amount).await {
                        Ok(balance) => println!("Balance: {} USD", format_usd(balance.usd)),
                        Err(e) => report(&e),
                    }
                }
            }
            "5" | "buy" => {
                println!("Price: {} USD", format_usd(service.market()));
                let Some(amount) = ask_amount(input, "USD to spend: ").await? else {
                    return Ok(false);
                };
                if let Some(amount) = amount {
                    match service.buy(identity, amount).await {
                        Ok(trade) => println!(
                            "Bought {} at {} (block {}). Balance: {} USD, {} asset",
                            format_asset(trade.record.asset_quantity()),
                            format_usd(trade.record.price),
                            trade.block.index(),
                            format_usd(trade.balance.usd),
                            format_asset(trade.balance.asset)
                        ),
                        Err(e) => report(&e),
                    }
                }
            }
            "6" | "sell" => {
                println!("Price: {} USD", format_usd(service.market()));
                let Some(amount) = ask_amount(input, "Asset to sell: ").await? else {
                    return Ok(false);
                };
                if let Some(amount) = amount {
                    match service.sell(identity, amount).await {
                        Ok(trade) => println!(
                            "Sold {} for {} USD (block {}). Balance: {} USD, {} asset",
                            format_asset(trade.record.asset_quantity()),
                            format_usd(trade.record.usd_value()),
                            trade.block.index(),
                            format_usd(trade.balance.usd),
                            format_asset(trade.balance.asset)
                        ),
                        Err(e) => report(&e),
                    }
                }
            }
            "7" | "history" => match service.history(identity).await {
                Ok(entries) if entries.is_empty() => println!("No trades recorded."),
                Ok(entries) => {
                    for entry in entries {
                        println!(
                            "#{:<5} {:<4} {:>14} @ {:>10}",
                            entry.block_index,
                            entry.record.action,
                            format_asset(entry.record.asset_quantity()),
                            format_usd(entry.record.price)
                        );
                    }
                }
                Err(e) => report(&e),
            },
            "8" | "logout" => return Ok(true),
            "" => {}
            other => println!("Unknown option: {}", other),
        }
    }
}

async fn prompt(input: &mut Input, label: &str) -> Result<Option<String>> {
    print!("{}", label);
    std::io::stdout().flush()?;
    Ok(input.next_line().await?.map(|line| line.trim().to_lowercase()))
}

/// Reads a line without case folding.
async fn prompt_raw(input: &mut Input, label: &str) -> Result<Option<String>> {
    print!("{}", label);
    std::io::stdout().flush()?;
    Ok(input.next_line().await?)
}

async fn ask_credentials(input: &mut Input) -> Result<Option<(String, String)>> {
    let Some(user) = prompt_raw(input, "User: ").await? else {
        return Ok(None);
    };
    let Some(password) = prompt_raw(input, "Password: ").await? else {
        return Ok(None);
    };
    Ok(Some((user, password)))
}

/// Outer `None` means end of input, inner `None` an unparseable amount.
async fn ask_amount(input: &mut Input, label: &str) -> Result<Option<Option<f64>>> {
    let Some(line) = prompt(input, label).await? else {
        return Ok(None);
    };
    match parse_amount(&line) {
        Ok(amount) => Ok(Some(Some(amount))),
        Err(e) => {
            println!("Invalid amount: {}", e);
            Ok(Some(None))
        }
    }
}

fn report(err: &AppError) {
    if err.is_rejection() {
        println!("Rejected: {}", err);
    } else {
        println!("Error: {}", err);
    }
}
