pub(super) const ROOT_LONG_ABOUT: &str = "\
Operations on huge directory trees

Treeop treats each directory tree as a multiset of files identified by
content. It answers questions like which files appear in both of two
trees, which files are redundant duplicates, and how much space copies
or hardlinkable duplicates are wasting.

CORE CONCEPTS:

  .dirdb files:
    Each scanned directory carries a .dirdb file mapping its files to
    content digests, keyed by size and mtime. Rescans only rehash files
    whose metadata changed, so repeated runs over large trees are fast.
    A directory moves together with its cache.

  Match key:
    Files match when their content digests agree. With --same-filename
    the basename must agree as well. --min-size excludes small files
    from matching entirely.

  Plans:
    Mutating operations first materialize a full plan, then execute it
    in one pass. With --dry-run the plan is printed as 'Would ...' lines
    and nothing is touched; the printed counters match a real run.

TYPICAL WORKFLOW:

  1. Compare two trees:
     $ treeop --intersect ~/photos ~/backup/photos

  2. Preview removing the duplicates from the backup:
     $ treeop --intersect --remove-copies --dry-run ~/photos ~/backup/photos

  3. Actually remove them, then clean up empty directories:
     $ treeop --intersect --remove-copies --remove-empty-dirs \\
         ~/photos ~/backup/photos

  4. Deduplicate a single tree in place via hardlinks:
     $ treeop --hardlink-copies --min-size 4096 ~/archive
";
