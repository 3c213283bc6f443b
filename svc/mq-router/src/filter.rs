// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topic filter matching.
//!
//! Filters follow the MQTT wildcard grammar: `+` stands for exactly one
//! topic level, `#` for the remainder of the topic (zero or more
//! levels) and may only appear as the final level. A wildcard glued to
//! other characters within a level (`sport/tennis#`, `a/b+/c`) is
//! malformed and matches nothing.
//!
//! `a/b/#` matches `a/b` itself as well as everything below it.

pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if filter == "#" {
        return true;
    }

    let fsegs: Vec<&str> = filter.split('/').collect();
    for (i, seg) in fsegs.iter().enumerate() {
        let last = i == fsegs.len() - 1;
        if seg.contains('#') && (*seg != "#" || !last) {
            return false;
        }
        if seg.contains('+') && *seg != "+" {
            return false;
        }
    }

    let tsegs: Vec<&str> = topic.split('/').collect();
    let mut ti = 0;
    for seg in &fsegs {
        match *seg {
            "#" => return true,
            "+" => {
                if ti >= tsegs.len() {
                    return false;
                }
                ti += 1;
            }
            literal => {
                if ti >= tsegs.len() || tsegs[ti] != literal {
                    return false;
                }
                ti += 1;
            }
        }
    }
    ti == tsegs.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn documented_cases() {
        assert!(topic_matches("#", "a/b"));
        assert!(topic_matches("sport/#", "sport"));
        assert!(topic_matches("sport/#", "sport/tennis/player1"));
        assert!(topic_matches("sport/tennis/+", "sport/tennis/player1"));
        assert!(topic_matches("sport/tennis/+", "sport/tennis/player2"));
        assert!(!topic_matches(
            "sport/tennis/+",
            "sport/tennis/player1/ranking",
        ));
        assert!(topic_matches("sport/tennis", "sport/tennis"));
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(!topic_matches("a/+/c", "a/b/d"));
        assert!(topic_matches(
            "sport/tennis/player1/#",
            "sport/tennis/player1",
        ));
        assert!(topic_matches(
            "sport/tennis/player1/#",
            "sport/tennis/player1/score/wimbledon",
        ));
    }

    #[test]
    fn malformed_filters_match_nothing() {
        assert!(!topic_matches("sport/tennis#", "sport/tennis"));
        assert!(!topic_matches("sport/#/ranking", "sport/x/ranking"));
        assert!(!topic_matches("a/b+", "a/bc"));
        assert!(!topic_matches("#x", "anything"));
    }

    #[test]
    fn exact_and_near_misses() {
        assert!(!topic_matches("sport/tennis", "sport"));
        assert!(!topic_matches("sport", "sport/tennis"));
        assert!(!topic_matches("+", "a/b"));
        assert!(topic_matches("+", "a"));
        assert!(topic_matches("+/+", "a/b"));
    }

    /// Independent recursive matcher used as the test oracle.
    fn reference(fsegs: &[&str], tsegs: &[&str]) -> bool {
        match (fsegs.first(), tsegs.first()) {
            (None, None) => true,
            (Some(&"#"), _) => fsegs.len() == 1,
            (None, Some(_)) => false,
            (Some(&"+"), Some(_)) => {
                reference(&fsegs[1..], &tsegs[1..])
            }
            (Some(&f), Some(&t)) => {
                !f.contains(['#', '+'])
                    && f == t
                    && reference(&fsegs[1..], &tsegs[1..])
            }
            (Some(&f), None) => {
                // Only a trailing '#' may match an exhausted topic.
                f == "#" && fsegs.len() == 1
            }
        }
    }

    fn levels(max: usize, alphabet: &'static [&'static str])
        -> impl Strategy<Value = String>
    {
        proptest::collection::vec(
            proptest::sample::select(alphabet.to_vec()),
            1..=max,
        )
        .prop_map(|v| v.join("/"))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]
        #[test]
        fn agrees_with_reference(
            filter in levels(5, &["a", "b", "c", "+", "#"]),
            topic in levels(5, &["a", "b", "c", "+", "#"]),
        ) {
            let fsegs: Vec<&str> = filter.split('/').collect();
            let tsegs: Vec<&str> = topic.split('/').collect();
            prop_assert_eq!(
                topic_matches(&filter, &topic),
                reference(&fsegs, &tsegs),
                "filter={} topic={}", filter, topic,
            );
        }
    }
}
