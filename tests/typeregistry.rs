//! Session-level behavior through the public API: bootstrap, revision flushing, object
//! walks, string and exception decoding, domain and thread-pool views.

mod common;

use std::sync::Arc;

use clrscope::dac::{AppDomainData, AppDomainStoreData, ThreadPoolData, WorkRequestData};
use clrscope::{AbiProfile, ClrRuntime, ClrVersion, Error, PointerWidth};

use common::{FixtureDac, MSCORLIB, MT_EXCEPTION, MT_OBJECT, MT_STRING};

fn runtime_over(dac: FixtureDac) -> ClrRuntime {
    ClrRuntime::new(
        Arc::new(dac),
        AbiProfile::new(ClrVersion::V45, PointerWidth::Bits64),
    )
    .expect("session bootstrap")
}

#[test]
fn test_bootstrap_failure_is_fatal() {
    let mut dac = FixtureDac::new();
    dac.fail_bootstrap = true;

    let result = ClrRuntime::new(
        Arc::new(dac),
        AbiProfile::new(ClrVersion::V45, PointerWidth::Bits64),
    );
    assert!(matches!(result, Err(Error::Dac { .. })));
}

#[test]
fn test_flush_invalidates_stale_heap_views() {
    let runtime = runtime_over(FixtureDac::new());

    let stale = runtime.heap().expect("heap view");
    assert!(stale
        .heap_type(MT_STRING, 0, 0)
        .expect("resolution")
        .is_some());

    runtime.flush();
    assert_eq!(runtime.revision(), 1);

    let err = stale.heap_type(MT_STRING, 0, 0).unwrap_err();
    assert!(matches!(
        err,
        Error::RevisionMismatch {
            cached: 0,
            current: 1
        }
    ));

    // A freshly requested view answers again.
    let fresh = runtime.heap().expect("heap view after flush");
    assert!(fresh
        .heap_type(MT_STRING, 0, 0)
        .expect("resolution")
        .is_some());
}

#[test]
fn test_object_walk_decodes_string_contents() {
    let dac = FixtureDac::new()
        .with_segment(0x3_0000, 0x3_0018)
        .with_string_object(0x3_0000, "pinned");

    let runtime = runtime_over(dac);
    let heap = runtime.heap().expect("heap view");

    let objects: Vec<_> = heap.enumerate_objects().collect();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].address, 0x3_0000);
    assert_eq!(objects[0].ty.name(), "System.String");

    let text = heap
        .string_contents(0x3_0000)
        .expect("string read")
        .expect("string present");
    assert_eq!(text, "pinned");
}

#[test]
fn test_exception_message_follows_the_message_field() {
    // v4.5/64-bit: the _message reference sits two pointers into the object.
    let dac = FixtureDac::new()
        .with_u64(0xE_0000, MT_EXCEPTION)
        .with_u64(0xE_0000 + 16, 0x3_0000)
        .with_string_object(0x3_0000, "out of cheese");

    let runtime = runtime_over(dac);
    let heap = runtime.heap().expect("heap view");

    let message = heap
        .exception_message(0xE_0000)
        .expect("exception read")
        .expect("message present");
    assert_eq!(message, "out of cheese");
}

#[test]
fn test_domain_and_module_enumeration() {
    let dac = FixtureDac::new()
        .with_domains(
            AppDomainStoreData {
                system_domain: 0x10,
                shared_domain: 0,
                domain_count: 1,
            },
            vec![0x2000],
        )
        .with_domain(AppDomainData {
            address: 0x10,
            id: 0,
            name: Some("System Domain".to_string()),
        })
        .with_domain(AppDomainData {
            address: 0x2000,
            id: 1,
            name: Some("MyApp.exe".to_string()),
        })
        .with_assemblies(0x2000, vec![0x3000])
        .with_modules_of(0x3000, vec![MSCORLIB]);

    let runtime = runtime_over(dac);
    let set = runtime.app_domains();

    assert_eq!(set.system.as_ref().map(|d| d.address()), Some(0x10));
    assert!(set.shared.is_none());
    assert_eq!(set.domains.len(), 1);
    assert_eq!(set.domains[0].name(), Some("MyApp.exe"));

    let modules = runtime.modules();
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].name(), Some("mscorlib.dll"));
    assert_eq!(modules[0].id(), 1);
}

#[test]
fn test_type_preload_covers_every_module() {
    let dac = FixtureDac::new()
        .with_domains(
            AppDomainStoreData {
                system_domain: 0x10,
                shared_domain: 0,
                domain_count: 1,
            },
            vec![0x2000],
        )
        .with_domain(AppDomainData {
            address: 0x2000,
            id: 1,
            name: None,
        })
        .with_assemblies(0x2000, vec![0x3000])
        .with_modules_of(0x3000, vec![MSCORLIB])
        .with_method_tables_of(MSCORLIB, vec![MT_OBJECT, MT_STRING]);

    let runtime = runtime_over(dac);
    let heap = runtime.heap().expect("heap view");

    let names: Vec<String> = heap
        .enumerate_types()
        .expect("preload")
        .map(|ty| ty.name().to_string())
        .collect();
    assert!(names.iter().any(|n| n == "System.Object"));
    assert!(names.iter().any(|n| n == "System.String"));
}

#[test]
fn test_thread_pool_queue_walk_stops_at_unreadable_record() {
    let dac = FixtureDac::new().with_thread_pool(
        ThreadPoolData {
            min_threads: 4,
            max_threads: 64,
            first_work_request: 0x7000,
            ..ThreadPoolData::default()
        },
        vec![
            (
                0x7000,
                WorkRequestData {
                    function: 0xAAA,
                    context: 1,
                    next: 0x7100,
                },
            ),
            (
                0x7100,
                WorkRequestData {
                    function: 0xBBB,
                    context: 2,
                    next: 0x7200, // dangles
                },
            ),
        ],
    );

    let runtime = runtime_over(dac);
    let pool = runtime.thread_pool().expect("pool counters");

    assert_eq!(pool.min_threads, 4);
    assert_eq!(pool.max_threads, 64);
    assert_eq!(pool.queue_length(), 2);
    assert_eq!(pool.work_requests[0].function, 0xAAA);
    assert_eq!(pool.work_requests[1].context, 2);
}
