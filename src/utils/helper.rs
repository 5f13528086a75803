use std::sync::{Mutex, MutexGuard};

/// Lock a std mutex, recovering the data if a holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shell-style glob match supporting `*` and `?`, as used by pattern
/// subscriptions.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_namespaced_channels() {
        assert!(glob_match("rates:*", "rates:USD/KRW"));
        assert!(glob_match("rates:USD/???", "rates:USD/KRW"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("rates:*", "fx:USD/KRW"));
        assert!(!glob_match("rates:USD/??", "rates:USD/KRW"));
    }
}
