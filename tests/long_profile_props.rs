use flood_results::long_profile::{self, ProfileLevels};
use flood_results::{Channel, LoaderConfig, LongProfile, Network};
use proptest::prelude::*;

// Straight reach n0 -> n1 -> ... with the given channel lengths
fn reach(lengths: &[f64]) -> Network {
    let n = lengths.len();
    let channels = lengths
        .iter()
        .enumerate()
        .map(|(i, len)| {
            let mut c = Channel::new(&format!("C{i}"), &format!("n{i}"), &format!("n{}", i + 1));
            c.length = *len;
            c.us_invert = 100.0 - i as f64;
            c.ds_invert = 99.0 - i as f64;
            c.us_channel = (i > 0).then(|| format!("C{}", i - 1));
            c.ds_channel = (i + 1 < n).then(|| format!("C{}", i + 1));
            c
        })
        .collect();
    Network::from_channels(channels)
}

proptest! {
    #[test]
    fn distances_are_ordered(lengths in prop::collection::vec(1.0f64..500.0, 1..20)) {
        let network = reach(&lengths);
        let chain = long_profile::resolve(&network, "C0", None).unwrap();
        prop_assert_eq!(chain.len(), lengths.len());

        let lp = LongProfile::build(&network, &chain, ProfileLevels::default(), &LoaderConfig::default()).unwrap();
        prop_assert_eq!(lp.dist_nodes.len(), chain.len() + 1);
        prop_assert!(lp.dist_nodes.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(lp.dist_chan_inverts.len(), 2 * chain.len());
        prop_assert!(lp.dist_chan_inverts.windows(2).all(|w| w[0] <= w[1]));
        prop_assert!(lp.dist_combined.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn resolve_is_direction_agnostic(n in 2usize..15, a in 0usize..15, b in 0usize..15) {
        let lengths = vec![10.0; n];
        let network = reach(&lengths);
        let (a, b) = (a % n, b % n);
        let start = format!("C{a}");
        let end = format!("C{b}");
        let forward = long_profile::resolve(&network, &start, Some(&end)).unwrap();
        let backward = long_profile::resolve(&network, &end, Some(&start)).unwrap();
        let mut f = forward.clone();
        let mut r = backward.clone();
        f.sort();
        r.sort();
        prop_assert_eq!(f, r);
        prop_assert_eq!(forward.len(), a.abs_diff(b) + 1);
    }
}

#[test]
fn rebuilding_a_profile_is_deterministic() {
    let network = reach(&[10.0, 20.0, 5.0]);
    let chain = long_profile::resolve(&network, "C0", Some("C2")).unwrap();
    let config = LoaderConfig::default();
    let a = LongProfile::build(&network, &chain, ProfileLevels::default(), &config).unwrap();
    let b = LongProfile::build(&network, &chain, ProfileLevels::default(), &config).unwrap();
    assert_eq!(format!("{a:?}"), format!("{b:?}"));
}
