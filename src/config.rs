//! Module used for parsing the config file
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead};

#[derive(Debug)]
pub struct Config {
    kv_pairs: HashMap<String, String>,
}

struct KVPair {
    key: String,
    value: String,
}

impl Config {
    /// Retuns a Config parsed from the file path provided
    pub fn new(path: &str) -> Result<Config, std::io::Error> {
        let file = File::open(path)?;
        let mut config = Config {
            kv_pairs: HashMap::new(),
        };

        let reader = io::BufReader::new(file);
        for line in reader.lines() {
            match parse_line(line?) {
                None => None,
                Some(pair) => config.kv_pairs.insert(pair.key, pair.value),
            };
        }

        Ok(config)
    }

    ///Return a value for a key if it exists.
    pub fn get(&self, key: &str) -> Option<&String> {
        self.kv_pairs.get(key)
    }
}

fn filter_comments(line: &str) -> String {
    let comment_pos = match line.find('#') {
        Some(i) => i,
        None => return line.to_string(),
    };
    line[..comment_pos].trim().to_string()
}

fn parse_line(line: String) -> Option<KVPair> {
    let filtered = filter_comments(&line);
    let sep_position = filtered.find('=')?;
    if !filtered[..sep_position].is_empty() && !filtered[sep_position + 1..].is_empty() {
        return Some(KVPair {
            key: filtered[..sep_position].to_string(),
            value: filtered[sep_position + 1..].to_string(),
        });
    }
    None
}
