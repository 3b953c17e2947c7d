//! Address book driver.
//!
//! # Responsibility
//! - Open the configured database (`ADDRESSBOOK_DB`, default in-memory).
//! - Run the sample workload end to end and print a short summary.
//! - Start file logging only when `ADDRESSBOOK_LOG_DIR` is set.

use addressbook_core::logging::init_from_settings;
use addressbook_core::{
    core_version, Address, AddressBook, DaoError, DaoResult, DatabaseConfig, LogSettings,
};
use log::{error, info};
use std::process::ExitCode;

fn main() -> ExitCode {
    let settings = LogSettings::from_env();
    if let Err(err) = init_from_settings(&settings) {
        eprintln!("logging disabled: {err}");
    }

    let config = match DatabaseConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    println!("addressbook_core version={}", core_version());
    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(
                "event=driver_run module=cli status=error error_kind={}",
                err.kind()
            );
            eprintln!("addressbook failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &DatabaseConfig) -> DaoResult<()> {
    let book = AddressBook::open(config)?;
    println!("opened {}", book.database());

    let removed = book.reset()?;
    if removed > 0 {
        println!("cleared {removed} existing address(es)");
    }

    book.load_samples()?;
    let all = book.addresses().fetch_all()?;
    println!(
        "stored {} addresses ({} personal, {} organisational)",
        all.len(),
        book.personal().fetch_all()?.len(),
        book.organisational().fetch_all()?.len()
    );

    let mut template = Address::default();
    template.nickname = "L%".to_string();
    let matches = book.addresses().find_by_example(&template)?;
    println!("nickname like \"L%\": {}", nicknames(&matches));

    let Some(mut lups) = matches.into_iter().find(|address| address.nickname == "Lups") else {
        return Err(DaoError::NotFound {
            entity: "Address",
            id: None,
        });
    };
    let id = lups.id().ok_or(DaoError::NotFound {
        entity: "Address",
        id: None,
    })?;

    lups.nickname = "Lupsi".to_string();
    book.addresses().save(&mut lups)?;
    book.addresses().commit()?;
    println!("after commit: {}", nickname_of(&book, id)?);

    lups.nickname = "Lupsi Wupsi".to_string();
    book.addresses().save(&mut lups)?;
    book.addresses().rollback()?;
    println!(
        "after rollback: {} (in memory: {})",
        nickname_of(&book, id)?,
        lups.nickname
    );

    let committed = book.addresses().fetch(id)?.ok_or(DaoError::NotFound {
        entity: "Address",
        id: Some(id),
    })?;
    book.addresses().delete(&committed)?;
    book.addresses().commit()?;
    println!(
        "after delete: {}",
        if book.addresses().fetch(id)?.is_none() {
            "gone"
        } else {
            "still present"
        }
    );

    let comms = book.communications().fetch_all()?;
    println!("communications stored: {}", comms.len());

    book.database().close_database()?;
    info!("event=driver_run module=cli status=ok");
    Ok(())
}

fn nickname_of(book: &AddressBook, id: addressbook_core::EntityId) -> DaoResult<String> {
    Ok(book
        .addresses()
        .fetch(id)?
        .map_or_else(|| "<missing>".to_string(), |address| address.nickname))
}

fn nicknames(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(|address| address.nickname.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
