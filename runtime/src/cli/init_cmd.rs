//! First-run wizard: asks for the account and city and writes them to the
//! configuration file. Hospital, department and doctor ids are edited by hand.

use crate::config::PropertiesConfig;
use anyhow::{bail, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::Path;

/// A city the booking site serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct City {
    pub name: &'static str,
    pub city_id: &'static str,
}

pub const CITIES: &[City] = &[
    City { name: "广州", city_id: "2918" },
    City { name: "长沙", city_id: "3274" },
    City { name: "香港", city_id: "3314" },
    City { name: "上海", city_id: "3306" },
    City { name: "武汉", city_id: "3276" },
    City { name: "重庆", city_id: "3316" },
    City { name: "北京", city_id: "2912" },
    City { name: "东莞", city_id: "2920" },
    City { name: "深圳", city_id: "5" },
    City { name: "海外", city_id: "6145" },
    City { name: "郑州", city_id: "3242" },
    City { name: "天津", city_id: "3308" },
    City { name: "淮南", city_id: "3014" },
];

/// Zero-based city index for a 1-based menu choice.
pub fn select_city(input: &str) -> Option<usize> {
    let choice: usize = input.trim().parse().ok()?;
    (1..=CITIES.len()).contains(&choice).then(|| choice - 1)
}

pub async fn run(config_path: &Path) -> Result<()> {
    let mut config = PropertiesConfig::load_or_create(config_path)?;
    let mut rl = DefaultEditor::new()?;

    println!("slothound configuration");
    println!("=======================");
    println!();

    let username = prompt(&mut rl, "Username: ")?;
    let password = prompt(&mut rl, "Password: ")?;
    config.set("username", &username)?;
    config.set("password", &password)?;

    println!();
    println!("Cities:");
    for (i, city) in CITIES.iter().enumerate() {
        println!("{:2}. {}", i + 1, city.name);
    }
    println!();

    loop {
        let input = prompt(&mut rl, "City number: ")?;
        match select_city(&input) {
            Some(index) => {
                config.set("city_index", &index.to_string())?;
                break;
            }
            None => println!("[!!] Enter a number between 1 and {}", CITIES.len()),
        }
    }

    println!();
    println!("[OK] Saved to {}", config.path().display());
    println!("  Fill in unit_id, dep_id and doc_id in that file before running `slothound register`.");
    Ok(())
}

fn prompt(rl: &mut DefaultEditor, label: &str) -> Result<String> {
    match rl.readline(label) {
        Ok(line) => Ok(line.trim().to_string()),
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => bail!("configuration cancelled"),
        Err(e) => Err(e.into()),
    }
}
