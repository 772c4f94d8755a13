use hopline_model::{AddressFamily, HopRecord};

const BANNER_MARKERS: [&str; 2] = ["traceroute to", "traceroute6 to"];

// ICMP error annotations such as `!H` or `!N`; their meaning is not kept.
const ANNOTATION_FLAGS: [char; 5] = ['!', 'X', 'H', 'N', 'P'];

const UNIT_TOKEN: &str = "ms";

/// Parses one trimmed line of `traceroute -n` output.
///
/// Returns `None` for lines that carry no hop data (the banner, blank
/// lines, anything not led by a hop number). Otherwise returns every
/// record found on the line in left-to-right order; all of them share the
/// line's hop number.
pub fn parse_line(family: AddressFamily, line: &str) -> Option<Vec<HopRecord>> {
    if line.is_empty() || BANNER_MARKERS.iter().any(|marker| line.contains(marker)) {
        return None;
    }

    let cleaned: String = line
        .chars()
        .filter(|c| !ANNOTATION_FLAGS.contains(c))
        .collect();
    let mut tokens = cleaned.split_whitespace();

    // Hop numbers are 1-based.
    let number: u32 = tokens.next()?.parse::<u32>().ok().filter(|n| *n > 0)?;

    let mut hops = Vec::new();
    let mut open: Option<HopRecord> = None;

    for (position, token) in tokens.enumerate() {
        let leading_star = position == 0 && token == HopRecord::NO_RESPONSE;

        if leading_star || is_address(family, token) {
            hops.extend(open.replace(HopRecord::new(number, token)));
            continue;
        }

        if token == UNIT_TOKEN || token == HopRecord::NO_RESPONSE {
            continue;
        }

        if let (Some(hop), Some(rtt)) = (open.as_mut(), parse_rtt(token)) {
            hop.rtts.push(rtt);
        }
    }

    hops.extend(open);
    Some(hops)
}

/// Structural address check: four dot-separated parts for IPv4, any colon
/// for IPv6. Output from `-n` never contains hostnames, so this is enough.
pub fn is_address(family: AddressFamily, token: &str) -> bool {
    match family {
        AddressFamily::Ipv4 => token.split('.').count() == 4,
        AddressFamily::Ipv6 => token.contains(':'),
    }
}

/// Parses a whole captured output, line by line.
pub fn parse_output(family: AddressFamily, text: &str) -> Vec<HopRecord> {
    text.lines()
        .filter_map(|line| parse_line(family, line.trim()))
        .flatten()
        .collect()
}

fn parse_rtt(token: &str) -> Option<f64> {
    token
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(line: &str) -> Option<Vec<HopRecord>> {
        parse_line(AddressFamily::Ipv4, line)
    }

    #[test]
    fn banner_and_blank_lines_are_not_data() {
        assert_eq!(
            v4("traceroute to 193.2.1.87 (193.2.1.87), 30 hops max, 60 byte packets"),
            None
        );
        assert_eq!(
            parse_line(
                AddressFamily::Ipv6,
                "traceroute6 to 2001:db8::1 (2001:db8::1), 30 hops max"
            ),
            None
        );
        assert_eq!(v4(""), None);
    }

    #[test]
    fn line_without_hop_number_is_not_data() {
        assert_eq!(v4("192.168.1.1  0.5 ms"), None);
    }

    #[test]
    fn hop_zero_is_not_data() {
        assert_eq!(v4("0  10.0.0.1  1.0 ms"), None);
        assert!(v4("10  10.0.0.10  1.0 ms").is_some());
    }

    #[test]
    fn single_address_collects_all_rtts_in_order() {
        let hops = v4("1  192.168.1.1  0.496 ms  0.925 ms  1.138 ms").unwrap();
        assert_eq!(
            hops,
            vec![HopRecord {
                number: 1,
                address: "192.168.1.1".to_string(),
                rtts: vec![0.496, 0.925, 1.138],
            }]
        );
    }

    #[test]
    fn each_address_starts_a_new_record() {
        let hops = v4("8  154.54.2.165  46.276 ms 154.54.5.37  46.271 ms 154.54.5.57  45.894 ms")
            .unwrap();

        let summary: Vec<(u32, &str, &[f64])> = hops
            .iter()
            .map(|hop| (hop.number, hop.address.as_str(), hop.rtts.as_slice()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (8, "154.54.2.165", &[46.276][..]),
                (8, "154.54.5.37", &[46.271][..]),
                (8, "154.54.5.57", &[45.894][..]),
            ]
        );
    }

    #[test]
    fn leading_star_opens_a_no_response_record() {
        let hops = v4("21  * 88.200.7.249  210.282 ms  207.316 ms").unwrap();
        assert_eq!(hops.len(), 2);
        assert!(hops[0].is_no_response());
        assert!(hops[0].rtts.is_empty());
        assert_eq!(hops[1].address, "88.200.7.249");
        assert_eq!(hops[1].rtts, vec![210.282, 207.316]);
    }

    #[test]
    fn all_stars_yield_one_empty_record() {
        let hops = v4("9  * * *").unwrap();
        assert_eq!(hops, vec![HopRecord::new(9, "*")]);
    }

    #[test]
    fn later_stars_are_noise() {
        let hops = v4("22  88.200.7.249  196.908 ms * *").unwrap();
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].rtts, vec![196.908]);
    }

    #[test]
    fn annotation_flags_are_stripped() {
        let hops = v4("12  10.1.1.1  3.001 ms !H  3.101 ms !N  2.9 ms !X").unwrap();
        assert_eq!(hops[0].rtts, vec![3.001, 3.101, 2.9]);
    }

    #[test]
    fn malformed_tokens_are_dropped() {
        let hops = v4("4  10.0.0.4  1.5 ms  abc  NaN  -3.0  inf  2.5 ms").unwrap();
        assert_eq!(hops[0].rtts, vec![1.5, 2.5]);
    }

    #[test]
    fn rtts_before_any_address_are_dropped() {
        let hops = v4("5  1.25 ms 10.0.0.5  2.5 ms").unwrap();
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].rtts, vec![2.5]);
    }

    #[test]
    fn bare_hop_number_yields_no_records() {
        assert_eq!(v4("6"), Some(Vec::new()));
    }

    #[test]
    fn ipv6_addresses_are_recognized_by_colon() {
        let hops = parse_line(
            AddressFamily::Ipv6,
            "3  2001:4801:800:cb:c3::  0.766 ms 2001:4801:800:ca:c3::  0.773 ms",
        )
        .unwrap();
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[1].address, "2001:4801:800:ca:c3::");
        assert_eq!(hops[1].rtts, vec![0.773]);
    }

    #[test]
    fn family_decides_what_counts_as_an_address() {
        assert!(is_address(AddressFamily::Ipv4, "10.0.0.1"));
        assert!(!is_address(AddressFamily::Ipv4, "0.496"));
        assert!(!is_address(AddressFamily::Ipv6, "10.0.0.1"));
        assert!(is_address(AddressFamily::Ipv6, "fe80::1"));
    }

    #[test]
    fn parsing_is_repeatable() {
        let line = "17  164.177.137.103  155.621 ms 164.177.137.101  155.285 ms";
        assert_eq!(v4(line), v4(line));
    }

    #[test]
    fn parse_output_flattens_lines_in_order() {
        let text = "traceroute to 10.0.0.3 (10.0.0.3), 30 hops max\n \
                    1  10.0.0.1  1.0 ms\n \
                    2  * 10.0.0.2  2.0 ms\n";
        let hops = parse_output(AddressFamily::Ipv4, text);
        let numbers: Vec<u32> = hops.iter().map(|hop| hop.number).collect();
        assert_eq!(numbers, vec![1, 2, 2]);
    }
}
