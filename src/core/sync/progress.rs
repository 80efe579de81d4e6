#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub bytes: u64,
    pub percent: u8,
    pub rate: Option<String>,
}

/// Parses an rsync `--progress` line such as
/// `  1.23M  45%  10.52MB/s    0:00:03`. rsync redraws the line with `\r`,
/// so only the last segment is considered.
pub fn parse_progress_line(line: &str) -> Option<TransferProgress> {
    let segment = line
        .split('\r')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .last()?;
    let mut tokens = segment.split_whitespace();

    let bytes = parse_size(tokens.next()?)?;
    let percent = tokens
        .next()?
        .strip_suffix('%')?
        .parse::<u8>()
        .ok()
        .filter(|p| *p <= 100)?;
    let rate = tokens
        .next()
        .filter(|token| token.ends_with("/s"))
        .map(str::to_string);

    Some(TransferProgress {
        bytes,
        percent,
        rate,
    })
}

/// `1,234`, `1.23K` or `4.00G` as bytes. Suffixes are powers of 1000, as
/// printed by `rsync -h`.
pub fn parse_size(token: &str) -> Option<u64> {
    let token = token.replace(',', "");
    let (number, multiplier) = match token.chars().last()? {
        'K' | 'k' => (&token[..token.len() - 1], 1e3),
        'M' => (&token[..token.len() - 1], 1e6),
        'G' => (&token[..token.len() - 1], 1e9),
        'T' => (&token[..token.len() - 1], 1e12),
        _ => (token.as_str(), 1.0),
    };
    let value = number.parse::<f64>().ok()?;
    if value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}
