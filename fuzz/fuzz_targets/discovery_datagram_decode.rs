#![no_main]

use hearth_discovery::datagram::{DISCOVERY_SERVICE, MAX_DATAGRAM_BYTES};
use hearth_discovery::DiscoveryDatagram;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some(datagram) = DiscoveryDatagram::decode(data) else {
        return;
    };
    assert!(data.len() <= MAX_DATAGRAM_BYTES);
    match &datagram {
        DiscoveryDatagram::Probe { service, .. } => assert_eq!(service, DISCOVERY_SERVICE),
        DiscoveryDatagram::Announce(announcement) => {
            assert_eq!(announcement.service, DISCOVERY_SERVICE)
        }
    }

    // Absent optional fields encode as nulls, so a re-encoding may outgrow the limit.
    let reencoded = datagram.encode();
    if reencoded.len() <= MAX_DATAGRAM_BYTES {
        assert_eq!(DiscoveryDatagram::decode(&reencoded).as_ref(), Some(&datagram));
    }
});
