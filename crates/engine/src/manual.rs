//! Manual-control selectors: the matching algebra CLI tools use to pick a
//! subset of an in-memory loaded index before a single rewrite pass. A
//! selector combines a *match set* (URL glob patterns, exact/wildcard
//! footprints, qkey ranges, a batch footprint list — these OR together,
//! a record need only satisfy one) with a *limiter* (record kind, flag
//! mask, age window, classifier area — these AND together). Both stages
//! are grounded on the real matcher/limiter split: per-site matchers are
//! attached to a site's own linked list (`connect_matcher`) so several
//! patterns naming the same site accumulate instead of overwrite, while
//! `sel_check_limiters` narrows independently of which matcher fired.
//!
//! Two-phase URL-glob matching (an index record only stores
//! footprints; matching a `/blog/*`-style pattern against its actual
//! path needs the resolved URL text) is modeled with an optional
//! `url_lookup` table the caller builds from the URL database; a glob
//! matcher with no URL available for its record simply doesn't match,
//! documented at [`SiteMatchSet::pass2`].

use shepherd_core::footprint::Footprint;
use shepherd_core::qkey::Skey;
use shepherd_core::url_state::{Oid, UrlFlags, UrlKind};
use shepherd_core::{Config, Site, UrlState};
use std::collections::{HashMap, HashSet};

use crate::site_table::SiteTable;

/// A sorted, deduplicated set of footprints selected from an index, the
/// unit every manual-control operation produces and consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlSet(Vec<Footprint>);

impl UrlSet {
    /// An empty set.
    pub fn new() -> UrlSet {
        UrlSet(Vec::new())
    }

    /// Build a set from an arbitrary footprint list, sorting and
    /// deduplicating it.
    pub fn from_footprints(mut fps: Vec<Footprint>) -> UrlSet {
        fps.sort();
        fps.dedup();
        UrlSet(fps)
    }

    /// Number of footprints in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `fp` is a member.
    pub fn contains(&self, fp: &Footprint) -> bool {
        self.0.binary_search(fp).is_ok()
    }

    /// Iterate the set's footprints in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Footprint> {
        self.0.iter()
    }
}

/// Select every record belonging to site `site_fp` — equivalent to a
/// `Selector` whose only matcher is `site_fp:*`.
pub fn select_by_site(records: &[UrlState], site_fp: &[u8; 16]) -> UrlSet {
    UrlSet::from_footprints(
        records
            .iter()
            .filter(|r| &r.fp.site_fp == site_fp)
            .map(|r| r.fp)
            .collect(),
    )
}

/// Select every record tagged with classifier `section`.
pub fn select_by_section(records: &[UrlState], section: u16) -> UrlSet {
    UrlSet::from_footprints(
        records
            .iter()
            .filter(|r| r.section == section)
            .map(|r| r.fp)
            .collect(),
    )
}

/// Select every record flagged sacred.
pub fn select_sacred(records: &[UrlState]) -> UrlSet {
    UrlSet::from_footprints(
        records
            .iter()
            .filter(|r| r.is_sacred())
            .map(|r| r.fp)
            .collect(),
    )
}

/// Select every zombie record.
pub fn select_zombies(records: &[UrlState]) -> UrlSet {
    UrlSet::from_footprints(
        records
            .iter()
            .filter(|r| matches!(r.kind, UrlKind::Zombie))
            .map(|r| r.fp)
            .collect(),
    )
}

/// Overwrite every member of `set`'s weight, returning how many records
/// were touched.
pub fn apply_weight_override(records: &mut [UrlState], set: &UrlSet, weight: u8) -> usize {
    let mut touched = 0;
    for rec in records.iter_mut() {
        if set.contains(&rec.fp) {
            rec.weight = weight;
            touched += 1;
        }
    }
    touched
}

/// Set or clear `flag` on every member of `set`, returning how many records
/// were touched.
pub fn apply_flag(records: &mut [UrlState], set: &UrlSet, flag: UrlFlags, on: bool) -> usize {
    let mut touched = 0;
    for rec in records.iter_mut() {
        if set.contains(&rec.fp) {
            if on {
                rec.flags.insert(flag);
            } else {
                rec.flags.remove(flag);
            }
            touched += 1;
        }
    }
    touched
}

/// Mark every member of `set` deleted, matching merge's convention of
/// `Oid::DELETED` as a tombstone rather than physically removing the record
/// — a later sort/compact pass drops it for good.
pub fn delete_set(records: &mut [UrlState], set: &UrlSet) -> usize {
    let mut touched = 0;
    for rec in records.iter_mut() {
        if set.contains(&rec.fp) {
            rec.oid = Oid::DELETED;
            touched += 1;
        }
    }
    touched
}

/// True if every footprint in `set` names a site still present in
/// `sites` — used by `shep-cleanup` to sanity-check a selection before
/// deleting it.
pub fn set_sites_all_live(set: &UrlSet, sites: &SiteTable) -> bool {
    set.iter().all(|fp| sites.get(&fp.site_fp).is_some())
}

/// `classify_pattern`: whether a pattern string is a bare literal, a
/// glob needing `*`/`?` expansion, or the special all-matching `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternClass {
    /// Matches only the identical string.
    Eq,
    /// Contains `*`/`?`, needs glob matching.
    Match,
    /// The bare wildcard `*`, matches everything without comparison.
    All,
}

/// Classify a pattern string the way `man-sel.c`'s `classify_pattern`
/// does.
pub fn classify_pattern(pattern: &str) -> PatternClass {
    if pattern == "*" {
        PatternClass::All
    } else if pattern.contains(['*', '?']) {
        PatternClass::Match
    } else {
        PatternClass::Eq
    }
}

/// Shell-style glob match (`*` = any run, `?` = any one character),
/// case-insensitive to match how hostnames are always compared after
/// lower-casing.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    fn rec(p: &[char], t: &[char]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some('*') => rec(&p[1..], t) || (!t.is_empty() && rec(p, &t[1..])),
            Some('?') => !t.is_empty() && rec(&p[1..], &t[1..]),
            Some(c) => {
                !t.is_empty() && t[0].to_ascii_lowercase() == c.to_ascii_lowercase() && rec(&p[1..], &t[1..])
            }
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    rec(&p, &t)
}

/// Test `text` against a classified pattern.
pub fn match_classified_pattern(pattern: &str, class: PatternClass, text: &str) -> bool {
    match class {
        PatternClass::Eq => pattern.eq_ignore_ascii_case(text),
        PatternClass::Match => glob_match(pattern, text),
        PatternClass::All => true,
    }
}

/// Port component of a [`UrlPattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortMatch {
    /// No port given: matches the protocol's default port only.
    Default,
    /// `:*` given: matches any port.
    Any,
    /// An explicit port.
    Exact(u16),
}

/// A parsed `proto://host[:port]/rest` selector pattern, split and
/// classified the way `split_url_pattern` does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    pub protocol: String,
    pub protocol_class: PatternClass,
    pub host: String,
    pub host_class: PatternClass,
    pub port: PortMatch,
    pub rest: String,
    pub rest_class: PatternClass,
}

/// Parse a URL pattern. Accepts the `/*` swindle (rest literally `/*`
/// is treated as [`PatternClass::All`] even though it contains a `/`).
pub fn split_url_pattern(pattern: &str) -> Result<UrlPattern, String> {
    let (protocol, after_scheme) = pattern
        .split_once("://")
        .ok_or_else(|| format!("invalid URL pattern `{pattern}`"))?;
    let (host_port, rest) = match after_scheme.find(['/', '?']) {
        Some(idx) => (&after_scheme[..idx], &after_scheme[idx..]),
        None => (after_scheme, ""),
    };
    let (host, port) = match host_port.split_once(':') {
        Some((h, "*")) => (h, PortMatch::Any),
        Some((h, p)) => {
            let port: u16 = p.parse().map_err(|_| format!("invalid port `{p}`"))?;
            (h, PortMatch::Exact(port))
        }
        None => (host_port, PortMatch::Default),
    };
    let host = host.to_ascii_lowercase();
    let rest_class = if rest == "/*" {
        PatternClass::All
    } else {
        classify_pattern(rest)
    };
    Ok(UrlPattern {
        protocol_class: classify_pattern(protocol),
        protocol: protocol.to_string(),
        host_class: classify_pattern(&host),
        host,
        port,
        rest_class,
        rest: rest.to_string(),
    })
}

fn default_port(proto: u8) -> u16 {
    if proto == 1 {
        443
    } else {
        80
    }
}

fn proto_name(proto: u8) -> &'static str {
    if proto == 1 {
        "https"
    } else {
        "http"
    }
}

/// Does `site` match a parsed pattern's protocol/host/port triple?
pub fn site_match_url_pattern(pattern: &UrlPattern, site: &Site) -> bool {
    if !match_classified_pattern(&pattern.protocol, pattern.protocol_class, proto_name(site.proto)) {
        return false;
    }
    match pattern.port {
        PortMatch::Default => {
            if site.port != default_port(site.proto) {
                return false;
            }
        }
        PortMatch::Exact(p) => {
            if site.port != p {
                return false;
            }
        }
        PortMatch::Any => {}
    }
    match_classified_pattern(&pattern.host, pattern.host_class, &site.host)
}

/// One matcher attached to a site: either an exact `rest_fp` (`UM_FP`,
/// for a literal path pattern) or a glob needing the resolved URL path
/// (`UM_URL`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteMatcher {
    /// Matches one exact `rest_fp`.
    Fp([u8; 16]),
    /// Matches the resolved URL's path+query against this glob.
    UrlGlob(String),
}

/// An accumulated, OR'd match set over sites: a site can be matched in
/// full (`SF_ANY`, e.g. a bare host pattern with `/*`) or matched only
/// for specific paths via its attached [`SiteMatcher`] list —
/// `connect_matcher`'s per-site sharing, here a plain per-site `Vec`.
#[derive(Debug, Clone, Default)]
pub struct SiteMatchSet {
    any_site: bool,
    full_sites: HashSet<[u8; 16]>,
    matchers: HashMap<[u8; 16], Vec<SiteMatcher>>,
}

impl SiteMatchSet {
    /// An empty match set (matches nothing until something is added).
    pub fn new() -> SiteMatchSet {
        SiteMatchSet::default()
    }

    /// Add every record, matching `sel_all`'s selector.
    pub fn add_all(&mut self) {
        self.any_site = true;
    }

    /// Add every site matching a `proto://host[:port]/rest` pattern.
    /// A `PatternClass::All` rest (bare `/*`) matches the whole site;
    /// otherwise each matching site gets a per-path matcher attached.
    pub fn add_url_pattern(&mut self, sites: &SiteTable, pattern: &str) -> Result<(), String> {
        let up = split_url_pattern(pattern)?;
        for site in sites.iter() {
            if !site_match_url_pattern(&up, site) {
                continue;
            }
            match up.rest_class {
                PatternClass::All => {
                    self.full_sites.insert(site.fp);
                }
                PatternClass::Eq => {
                    let fp = shepherd_core::footprint::rest_fp(&up.rest);
                    self.matchers.entry(site.fp).or_default().push(SiteMatcher::Fp(fp));
                }
                PatternClass::Match => {
                    self.matchers
                        .entry(site.fp)
                        .or_default()
                        .push(SiteMatcher::UrlGlob(up.rest.clone()));
                }
            }
        }
        Ok(())
    }

    /// Add by an exact or wildcarded `site_fp:rest_fp` hex pair (`*`
    /// stands for "any"). A `*` site half selects every site; a `*`
    /// rest half selects the whole named site.
    pub fn add_footprint(&mut self, spec: &str) -> Result<(), String> {
        let (site_part, rest_part) = spec
            .split_once(':')
            .ok_or_else(|| format!("invalid footprint `{spec}`"))?;
        let site_any = site_part == "*";
        let rest_any = rest_part == "*";
        if site_any {
            self.any_site = true;
            return Ok(());
        }
        let site_fp = parse_hex16(site_part)?;
        if rest_any {
            self.full_sites.insert(site_fp);
        } else {
            let rest = parse_hex16(rest_part)?;
            self.matchers.entry(site_fp).or_default().push(SiteMatcher::Fp(rest));
        }
        Ok(())
    }

    /// Add by normalised footprint: every site whose `norm_fp` equals
    /// the given site half gets the same matcher a plain [`add_footprint`]
    /// would attach to a single site.
    ///
    /// [`add_footprint`]: SiteMatchSet::add_footprint
    pub fn add_norm_footprint(&mut self, sites: &SiteTable, spec: &str) -> Result<(), String> {
        let (site_part, rest_part) = spec
            .split_once(':')
            .ok_or_else(|| format!("invalid footprint `{spec}`"))?;
        if site_part == "*" {
            self.any_site = true;
            return Ok(());
        }
        let norm_fp = parse_hex16(site_part)?;
        let rest_any = rest_part == "*";
        let rest = if rest_any { None } else { Some(parse_hex16(rest_part)?) };
        for site in sites.iter() {
            if site.norm_fp != norm_fp {
                continue;
            }
            match rest {
                None => {
                    self.full_sites.insert(site.fp);
                }
                Some(rest) => {
                    self.matchers.entry(site.fp).or_default().push(SiteMatcher::Fp(rest));
                }
            }
        }
        Ok(())
    }

    /// Add every site whose qkey falls in a `skey[/prefix]` range, or
    /// matches one of the special pseudo-skey classes
    /// (`non-ip`/`invalid`/`unresolved`), optionally restricted to one
    /// port (`port:skey...`).
    pub fn add_qkey(&mut self, sites: &SiteTable, spec: &str) -> Result<(), String> {
        let (port_filter, rest) = match spec.split_once(':') {
            Some((p, r)) if p.chars().all(|c| c.is_ascii_hexdigit()) && !p.is_empty() => {
                let port = u16::from_str_radix(p, 16).map_err(|_| format!("invalid port `{p}`"))?;
                (Some(port), r)
            }
            _ => (None, spec),
        };

        // The pseudo-skey ranges are distinguished by everything above the
        // low 16 (bucket) bits, so masking with the complement of that and
        // comparing against a bucket-0 instance isolates the prefix alone.
        let pseudo_mask: u32 = !(0xffffu32);
        let (mask, value): (u32, u32) = match rest {
            "non-ip" => (pseudo_mask, Skey::nonip(0).0 & pseudo_mask),
            "invalid" => (pseudo_mask, Skey::nonexistent(0, 1).0 & pseudo_mask),
            "unresolved" => (pseudo_mask, Skey::unresolved(0, 1).0 & pseudo_mask),
            _ => {
                if let Some((skey_hex, prefix)) = rest.split_once('/') {
                    let sk = u32::from_str_radix(skey_hex, 16).map_err(|_| format!("invalid skey `{skey_hex}`"))?;
                    let pxlen: u32 = prefix.parse().map_err(|_| format!("invalid prefix length `{prefix}`"))?;
                    if pxlen > 32 {
                        return Err(format!("prefix length `{pxlen}` out of range"));
                    }
                    let skm = if pxlen == 32 { !0u32 } else { !(!0u32 >> pxlen) };
                    (skm, sk & skm)
                } else {
                    let sk = u32::from_str_radix(rest, 16).map_err(|_| format!("invalid qkey `{rest}`"))?;
                    (!0u32, sk)
                }
            }
        };

        for site in sites.iter() {
            if let Some(port) = port_filter {
                if site.port != port {
                    continue;
                }
            }
            if site.skey.0 & mask == value {
                self.full_sites.insert(site.fp);
            }
        }
        Ok(())
    }

    /// Add a batch of exact footprints (the sorted-footprint-file
    /// form), each matched exactly.
    pub fn add_batch(&mut self, fps: impl IntoIterator<Item = Footprint>) {
        for fp in fps {
            self.matchers.entry(fp.site_fp).or_default().push(SiteMatcher::Fp(fp.rest_fp));
        }
    }

    /// True if this site has any matcher attached (used by
    /// `cmd_sites`-style site-level-only listings).
    pub fn matches_site_at_all(&self, site_fp: &[u8; 16]) -> bool {
        self.any_site || self.full_sites.contains(site_fp) || self.matchers.contains_key(site_fp)
    }

    /// Pass 1 (`sel_match_pass1`): test a record against exact `UM_FP`
    /// matchers and whole-site matches without needing its URL text.
    /// Returns `true`/`false` outright, or `None` to mean "undecided,
    /// try pass 2" (a `UM_URL` glob is attached to this site and must be
    /// tested against the resolved path).
    pub fn pass1(&self, rec: &UrlState) -> Option<bool> {
        if self.any_site || self.full_sites.contains(&rec.fp.site_fp) {
            return Some(true);
        }
        let Some(list) = self.matchers.get(&rec.fp.site_fp) else {
            return Some(false);
        };
        let mut needs_pass2 = false;
        for m in list {
            match m {
                SiteMatcher::Fp(fp) if *fp == rec.fp.rest_fp => return Some(true),
                SiteMatcher::Fp(_) => {}
                SiteMatcher::UrlGlob(_) => needs_pass2 = true,
            }
        }
        if needs_pass2 {
            None
        } else {
            Some(false)
        }
    }

    /// Pass 2 (`sel_match_pass2`): test a record's resolved
    /// path-and-query against this site's `UM_URL` globs. Skey/Zombie
    /// records have no real URL and never reach pass 2 in the first
    /// place (`pass1` only returns `None` for a site with a `UrlGlob`
    /// matcher, and such sites are never queried for those kinds by
    /// [`Selector::select`]).
    pub fn pass2(&self, site_fp: &[u8; 16], path_and_query: &str) -> bool {
        let Some(list) = self.matchers.get(site_fp) else {
            return false;
        };
        list.iter().any(|m| matches!(m, SiteMatcher::UrlGlob(patt) if glob_match(patt, path_and_query)))
    }
}

fn parse_hex16(s: &str) -> Result<[u8; 16], String> {
    if s.len() != 32 {
        return Err(format!("expected 32 hex chars, got {} in `{s}`", s.len()));
    }
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| format!("invalid hex in `{s}`"))?;
    }
    Ok(out)
}

fn kind_bit(kind: UrlKind) -> u8 {
    match kind {
        UrlKind::Sleeping => 1 << 0,
        UrlKind::New => 1 << 1,
        UrlKind::Ok => 1 << 2,
        UrlKind::Error => 1 << 3,
        UrlKind::Skey => 1 << 4,
        UrlKind::TempError => 1 << 5,
        UrlKind::Zombie => 1 << 6,
    }
}

/// Parse a type name (case-insensitive) into its [`UrlKind`] bit.
pub fn parse_kind_name(name: &str) -> Option<u8> {
    let kind = match name.to_ascii_lowercase().as_str() {
        "sleeping" => UrlKind::Sleeping,
        "new" => UrlKind::New,
        "ok" => UrlKind::Ok,
        "error" => UrlKind::Error,
        "skey" => UrlKind::Skey,
        "temperror" | "temp_error" => UrlKind::TempError,
        "zombie" => UrlKind::Zombie,
        _ => return None,
    };
    Some(kind_bit(kind))
}

/// `sel_check_limiters`: the AND'd narrowing stage independent of which
/// matcher selected a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Limiters {
    /// Bitmask of allowed [`UrlKind`]s (built from [`parse_kind_name`]);
    /// `!0` (the default) allows every kind.
    pub type_mask: u8,
    pub flags_mask: UrlFlags,
    pub flags_val: UrlFlags,
    pub age_min: u32,
    pub age_max: u32,
    pub area: Option<u16>,
}

impl Default for Limiters {
    fn default() -> Limiters {
        Limiters {
            type_mask: !0,
            flags_mask: UrlFlags::empty(),
            flags_val: UrlFlags::empty(),
            age_min: 0,
            age_max: u32::MAX,
            area: None,
        }
    }
}

impl Limiters {
    /// Restrict to one or more record kinds (OR'd together within this
    /// one limiter, matching `lim_types`'s bitmask).
    pub fn only_types(mut self, kinds: &[UrlKind]) -> Limiters {
        let mut mask = 0;
        for k in kinds {
            mask |= kind_bit(*k);
        }
        self.type_mask = mask;
        self
    }

    /// Require `flag` to be set (`plus`) or clear (`!plus`).
    pub fn only_flag(mut self, flag: UrlFlags, plus: bool) -> Limiters {
        self.flags_mask.insert(flag);
        if plus {
            self.flags_val.insert(flag);
        } else {
            self.flags_val.remove(flag);
        }
        self
    }

    /// Only records at least `secs` old (`cf_parse_int`'s `--older`).
    pub fn older_than(mut self, secs: u32) -> Limiters {
        self.age_min = secs;
        self
    }

    /// Only records at most `secs` old (`--newer`).
    pub fn newer_than(mut self, secs: u32) -> Limiters {
        self.age_max = secs;
        self
    }

    /// Restrict to one classifier area.
    pub fn only_area(mut self, area: u16) -> Limiters {
        self.area = Some(area);
        self
    }

    /// `man_url_age`: seconds since `last_seen`, clamped to zero for
    /// records that haven't been seen yet (or whose `last_seen` is, by
    /// clock skew, in the future).
    fn age(rec: &UrlState, now: u32) -> u32 {
        now.saturating_sub(rec.last_seen)
    }

    /// The combined AND of every limiter.
    pub fn matches(&self, rec: &UrlState, now: u32) -> bool {
        let age = Self::age(rec, now);
        (self.type_mask & kind_bit(rec.kind)) != 0
            && (rec.flags & self.flags_mask) == self.flags_val
            && self.area.map(|a| rec.area == a).unwrap_or(true)
            && age >= self.age_min
            && age <= self.age_max
    }
}

/// A complete manual-control selector: an OR'd [`SiteMatchSet`] narrowed
/// by an AND'd [`Limiters`], the combination `sel_index`'s driver loop
/// evaluates per record.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub matchers: SiteMatchSet,
    pub limiters: Limiters,
}

impl Selector {
    /// Run the selector over `records`. `url_lookup`, when given, backs
    /// pass-2 URL-glob matching (see [`SiteMatchSet::pass2`]); records
    /// needing pass 2 with no entry in `url_lookup` don't match.
    pub fn select(
        &self,
        records: &[UrlState],
        now: u32,
        url_lookup: Option<&HashMap<Footprint, String>>,
    ) -> UrlSet {
        let mut out = Vec::new();
        for rec in records {
            if !self.limiters.matches(rec, now) {
                continue;
            }
            let matched = match self.matchers.pass1(rec) {
                Some(b) => b,
                None => {
                    if matches!(rec.kind, UrlKind::Skey | UrlKind::Zombie) || rec.flags.contains(UrlFlags::CONTRIB) {
                        false
                    } else if let Some(url) = url_lookup.and_then(|m| m.get(&rec.fp)) {
                        let path = url.splitn(4, '/').nth(3).map(|p| format!("/{p}")).unwrap_or_default();
                        self.matchers.pass2(&rec.fp.site_fp, &path)
                    } else {
                        false
                    }
                }
            };
            if matched {
                out.push(rec.fp);
            }
        }
        UrlSet::from_footprints(out)
    }
}
