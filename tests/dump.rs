use pgalloc::{logger::Logger, BuddyAllocator, LinearMap, PageAllocator, PageDescriptor};

static LOGGER: Logger<String> = Logger::new(String::new());

#[test]
fn dump_state_lists_free_frames() {
    log::set_logger(&LOGGER).expect("failed to init logging");
    log::set_max_level(log::LevelFilter::Trace);

    let count = 1 << 16;
    let mut pages = vec![PageDescriptor::new(); count];
    let mut alloc = BuddyAllocator::new(&mut pages, LinearMap::new(0x8_0000, count)).unwrap();

    let pgd = alloc.alloc_pages(0).unwrap();
    assert_eq!(alloc.pfn(pgd), 0x8_0000);

    LOGGER.lock().clear();
    alloc.dump_state();

    let out = LOGGER.lock().clone();
    let lines = out.lines().collect::<Vec<_>>();

    assert!(lines[0].ends_with("> BUDDY STATE:"), "{}", out);
    assert!(lines[1].ends_with("> [0] 80001"), "{}", out);
    assert!(lines[2].ends_with("> [1] 80002"), "{}", out);
    assert!(lines[16].ends_with("> [15] 88000"), "{}", out);
    assert!(lines[17].ends_with("> [16]"), "{}", out);
    assert!(lines[18].contains("65535 pages"), "{}", out);
    assert!(lines.iter().all(|line| line.contains("Debug")), "{}", out);
}
