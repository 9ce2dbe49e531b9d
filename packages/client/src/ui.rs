//! UI utilities for the client.

use std::io::Write;

/// Prompt shown before user input
pub fn prompt(nickname: &str) -> String {
    format!("{}> ", nickname)
}

/// Redisplay the prompt after printing an event
pub fn redisplay_prompt(nickname: &str) {
    print!("{}", prompt(nickname));
    std::io::stdout().flush().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_uses_nickname() {
        // テスト項目: プロンプトに現在の名前が表示される
        // given (前提条件) / when (操作) / then (期待する結果):
        assert_eq!(prompt("alice"), "alice> ");
    }
}
