//! End-to-end copy-on-write fork behavior.

use proptest::prelude::*;

use ufork_kernel::layout::{PAGE_SIZE, UTEXT, UXSTACK_PAGE};
use ufork_kernel::{
    fork, logger, pgfault, set_pgfault_handler, EnvId, EnvStatus, FaultError, FaultInfo, Kernel,
    PagePerms, UserEnv, VirtualAddress,
};

fn stdout_sink(line: &str) {
    println!("{line}");
}

fn machine() -> Kernel {
    logger::init(stdout_sink);
    Kernel::new()
}

fn rw() -> PagePerms {
    PagePerms::PRESENT | PagePerms::USER | PagePerms::WRITABLE
}

fn ro() -> PagePerms {
    PagePerms::PRESENT | PagePerms::USER
}

/// Allocate a page at `va` in the calling env and fill it with `fill`.
fn map_filled(u: &UserEnv<'_>, va: usize, fill: u8) {
    let va = VirtualAddress::new(va);
    u.sys_page_alloc(u.id(), va, rw()).unwrap();
    u.write_bytes(va, &[fill; PAGE_SIZE]).unwrap();
}

/// Same, but leave the page mapped read-only afterwards.
fn map_filled_ro(u: &UserEnv<'_>, va: usize, fill: u8) {
    map_filled(u, va, fill);
    let va = VirtualAddress::new(va);
    u.sys_page_map(u.id(), va, u.id(), va, ro()).unwrap();
}

fn read_page(u: &UserEnv<'_>, va: usize) -> Vec<u8> {
    let mut buf = vec![0u8; PAGE_SIZE];
    u.read_bytes(VirtualAddress::new(va), &mut buf).unwrap();
    buf
}

const DATA: usize = UTEXT;
const RODATA: usize = UTEXT + PAGE_SIZE;

#[test]
fn fork_marks_shared_pages_cow_both_sides() {
    let kern = machine();
    let root = kern.create_root_env().unwrap();
    let mut u = UserEnv::enter(&kern, root);
    map_filled(&u, DATA, b'A');
    map_filled_ro(&u, RODATA, b'R');

    let child = fork(&mut u).unwrap();
    assert!(!child.is_null());
    assert_eq!(kern.env_status(child), EnvStatus::Runnable);
    assert_eq!(kern.pending_first_run_ret(child), Some(EnvId::NULL));

    let cu = UserEnv::enter(&kern, child);
    let pn = VirtualAddress::new(DATA).page_number();
    for view in [&u, &cu] {
        let perms = view.vpt(pn).unwrap();
        assert!(perms.is_present() && perms.is_user());
        assert!(perms.is_cow());
        assert!(!perms.is_writable());
    }

    // Read-only pages are shared as-is: no COW bit on either side.
    let ro_pn = VirtualAddress::new(RODATA).page_number();
    for view in [&u, &cu] {
        let perms = view.vpt(ro_pn).unwrap();
        assert!(!perms.is_cow());
        assert!(!perms.is_writable());
    }
}

#[test]
fn reads_after_fork_never_fault() {
    let kern = machine();
    let root = kern.create_root_env().unwrap();
    let mut u = UserEnv::enter(&kern, root);
    map_filled(&u, DATA, b'A');
    map_filled_ro(&u, RODATA, b'R');
    let child = fork(&mut u).unwrap();
    let cu = UserEnv::enter(&kern, child);

    let delivered_before = kern.fault_stats().delivered();
    for view in [&u, &cu] {
        assert!(read_page(view, DATA).iter().all(|&b| b == b'A'));
        assert!(read_page(view, RODATA).iter().all(|&b| b == b'R'));
    }
    assert_eq!(kern.fault_stats().delivered(), delivered_before);
}

#[test]
fn child_write_gets_private_copy() {
    let kern = machine();
    let root = kern.create_root_env().unwrap();
    let mut u = UserEnv::enter(&kern, root);
    map_filled(&u, DATA, b'A');
    let child = fork(&mut u).unwrap();
    let cu = UserEnv::enter(&kern, child);

    let frames_after_fork = kern.frames_in_use();
    cu.write_bytes(VirtualAddress::new(DATA), b"B").unwrap();

    // The child now privately owns a writable, non-COW copy.
    let pn = VirtualAddress::new(DATA).page_number();
    let child_perms = cu.vpt(pn).unwrap();
    assert!(child_perms.is_writable());
    assert!(!child_perms.is_cow());

    let child_page = read_page(&cu, DATA);
    assert_eq!(child_page[0], b'B');
    assert!(child_page[1..].iter().all(|&b| b == b'A'));

    // The parent's view is untouched, still COW.
    assert!(read_page(&u, DATA).iter().all(|&b| b == b'A'));
    assert!(u.vpt(pn).unwrap().is_cow());

    // Exactly one fresh frame was consumed by the copy.
    assert_eq!(kern.frames_in_use(), frames_after_fork + 1);
}

#[test]
fn both_sides_faulting_releases_the_shared_frame() {
    let kern = machine();
    let root = kern.create_root_env().unwrap();
    let mut u = UserEnv::enter(&kern, root);
    map_filled(&u, DATA, b'A');
    let child = fork(&mut u).unwrap();
    let cu = UserEnv::enter(&kern, child);

    // Data frame + two exception stacks.
    assert_eq!(kern.frames_in_use(), 3);

    cu.write_bytes(VirtualAddress::new(DATA), b"C").unwrap();
    u.write_bytes(VirtualAddress::new(DATA), b"P").unwrap();

    // The original shared frame is gone: two private copies + two stacks.
    assert_eq!(kern.frames_in_use(), 4);
    assert_eq!(read_page(&u, DATA)[0], b'P');
    assert_eq!(read_page(&cu, DATA)[0], b'C');
    assert_eq!(kern.fault_stats().resolved(), 2);
}

#[test]
fn exception_stack_is_never_shared() {
    let kern = machine();
    let root = kern.create_root_env().unwrap();
    let mut u = UserEnv::enter(&kern, root);
    map_filled(&u, DATA, b'A');
    let child = fork(&mut u).unwrap();
    let cu = UserEnv::enter(&kern, child);

    let pn = VirtualAddress::new(UXSTACK_PAGE).page_number();
    for view in [&u, &cu] {
        let perms = view.vpt(pn).unwrap();
        assert!(perms.is_writable());
        assert!(!perms.is_cow());
    }

    // Writing the child's stack goes through without any fault delivery
    // and leaves the parent's stack untouched.
    let delivered_before = kern.fault_stats().delivered();
    cu.write_bytes(VirtualAddress::new(UXSTACK_PAGE), b"marker")
        .unwrap();
    assert_eq!(kern.fault_stats().delivered(), delivered_before);
    assert!(read_page(&u, UXSTACK_PAGE).iter().all(|&b| b == 0));
}

#[test]
fn exofork_child_stays_suspended_until_activated() {
    let kern = machine();
    let root = kern.create_root_env().unwrap();
    let u = UserEnv::enter(&kern, root);
    set_pgfault_handler(&u, pgfault).unwrap();

    let child = u.sys_exofork().unwrap();
    assert_eq!(kern.env_status(child), EnvStatus::NotRunnable);
    u.sys_env_set_status(child, EnvStatus::Runnable).unwrap();
    assert_eq!(kern.env_status(child), EnvStatus::Runnable);
}

#[test]
fn child_first_run_takes_the_child_branch() {
    let kern = machine();
    let root = kern.create_root_env().unwrap();
    let mut u = UserEnv::enter(&kern, root);
    map_filled(&u, DATA, b'A');
    let child = fork(&mut u).unwrap();

    // Driving the child through fork replays its pending result: it takes
    // the child branch and creates nothing.
    let mut cu = UserEnv::enter(&kern, child);
    assert_eq!(fork(&mut cu).unwrap(), EnvId::NULL);
    assert_eq!(kern.pending_first_run_ret(child), None);

    // From now on the child forks for real.
    let grandchild = fork(&mut cu).unwrap();
    assert!(!grandchild.is_null());
    assert_eq!(kern.env_status(grandchild), EnvStatus::Runnable);
}

#[test]
fn fork_then_destroy_child_leaves_parent_intact() {
    let kern = machine();
    let root = kern.create_root_env().unwrap();
    let mut u = UserEnv::enter(&kern, root);
    map_filled(&u, DATA, b'A');
    let child = fork(&mut u).unwrap();

    u.sys_env_destroy(child).unwrap();
    assert_eq!(kern.env_status(child), EnvStatus::Free);

    // Parent still reads its data and can take the COW fault alone.
    assert!(read_page(&u, DATA).iter().all(|&b| b == b'A'));
    u.write_bytes(VirtualAddress::new(DATA), b"Z").unwrap();
    assert_eq!(read_page(&u, DATA)[0], b'Z');
    assert_eq!(kern.env_status(root), EnvStatus::Runnable);
}

#[test]
fn refork_keeps_already_cow_pages_cow() {
    let kern = machine();
    let root = kern.create_root_env().unwrap();
    let mut u = UserEnv::enter(&kern, root);
    map_filled(&u, DATA, b'A');
    let first = fork(&mut u).unwrap();
    let second = fork(&mut u).unwrap();
    assert_ne!(first, second);

    let pn = VirtualAddress::new(DATA).page_number();
    for id in [root, first, second] {
        let view = UserEnv::enter(&kern, id);
        let perms = view.vpt(pn).unwrap();
        assert!(perms.is_cow());
        assert!(!perms.is_writable());
    }
}

#[test]
fn write_fault_on_non_cow_page_is_fatal() {
    let kern = machine();
    let root = kern.create_root_env().unwrap();
    let u = UserEnv::enter(&kern, root);
    set_pgfault_handler(&u, pgfault).unwrap();
    map_filled_ro(&u, RODATA, b'R');

    let err = u
        .write_bytes(VirtualAddress::new(RODATA), b"x")
        .unwrap_err();
    assert_eq!(err, FaultError::NotCow);
    assert_eq!(kern.env_status(root), EnvStatus::Free);
    assert_eq!(kern.fault_stats().fatal(), 1);
}

#[test]
fn write_to_unmapped_page_is_fatal() {
    let kern = machine();
    let root = kern.create_root_env().unwrap();
    let u = UserEnv::enter(&kern, root);
    set_pgfault_handler(&u, pgfault).unwrap();

    let err = u.write_bytes(VirtualAddress::new(DATA), b"x").unwrap_err();
    assert_eq!(err, FaultError::NotCow);
    assert_eq!(kern.env_status(root), EnvStatus::Free);
}

#[test]
fn fault_without_upcall_is_fatal() {
    let kern = machine();
    let root = kern.create_root_env().unwrap();
    let u = UserEnv::enter(&kern, root);

    let err = u.write_bytes(VirtualAddress::new(DATA), b"x").unwrap_err();
    assert_eq!(err, FaultError::NoStack);
    assert_eq!(kern.env_status(root), EnvStatus::Free);
}

/// Handler that writes a second COW page from inside fault resolution.
fn reentrant_handler(u: &UserEnv<'_>, _utf: &FaultInfo) -> Result<(), FaultError> {
    u.write_bytes(VirtualAddress::new(RODATA), b"x")
}

#[test]
fn nested_fault_during_resolution_is_fatal() {
    let kern = machine();
    let root = kern.create_root_env().unwrap();
    let mut u = UserEnv::enter(&kern, root);
    map_filled(&u, DATA, b'A');
    map_filled(&u, RODATA, b'B');
    let _child = fork(&mut u).unwrap();

    // Both pages are COW now; swap in a handler that touches the second
    // page while resolving a fault on the first.
    set_pgfault_handler(&u, reentrant_handler).unwrap();
    let err = u.write_bytes(VirtualAddress::new(DATA), b"x").unwrap_err();
    assert_eq!(err, FaultError::Nested);
    assert_eq!(kern.env_status(root), EnvStatus::Free);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn cow_copy_is_byte_exact(data in proptest::collection::vec(any::<u8>(), PAGE_SIZE),
                              off in 0usize..PAGE_SIZE) {
        let kern = machine();
        let root = kern.create_root_env().unwrap();
        let mut u = UserEnv::enter(&kern, root);
        let va = VirtualAddress::new(DATA);
        u.sys_page_alloc(root, va, rw()).unwrap();
        u.write_bytes(va, &data).unwrap();

        let child = fork(&mut u).unwrap();
        let cu = UserEnv::enter(&kern, child);
        let poke = data[off].wrapping_add(1);
        cu.write_bytes(va.add(off), &[poke]).unwrap();

        // Parent keeps the original bytes exactly.
        prop_assert_eq!(read_page(&u, DATA), data.clone());

        // Child differs at exactly the poked offset.
        let mut expected = data;
        expected[off] = poke;
        prop_assert_eq!(read_page(&cu, DATA), expected);
    }
}
